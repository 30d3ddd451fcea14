/// External DSP module applied to rendered audio.
///
/// Invoked on the render thread with the device buffer region that was just
/// filled from the mix buffer.
pub trait DspProcessor: Send + Sync {
    /// Process `sample_count` frames of `buffer` in place.
    fn process_in_place(&self, buffer: &mut [u8], sample_count: usize);

    /// Processing is skipped entirely while this returns false.
    fn is_powered_on(&self) -> bool;
}
