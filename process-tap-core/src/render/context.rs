use std::sync::Arc;

use parking_lot::RwLock;

use crate::traits::dsp::DspProcessor;

/// State shared between the registry and the render worker.
///
/// The registry binds or clears the DSP module through the setters; the
/// render worker takes a snapshot once per cycle.
#[derive(Default)]
pub struct RenderContext {
    dsp: RwLock<Option<Arc<dyn DspProcessor>>>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_dsp(&self, dsp: Arc<dyn DspProcessor>) {
        *self.dsp.write() = Some(dsp);
    }

    pub fn clear_dsp(&self) {
        *self.dsp.write() = None;
    }

    pub fn has_dsp(&self) -> bool {
        self.dsp.read().is_some()
    }

    /// The bound DSP module, if any and powered on.
    pub fn active_dsp(&self) -> Option<Arc<dyn DspProcessor>> {
        self.dsp
            .read()
            .as_ref()
            .filter(|dsp| dsp.is_powered_on())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Switchable(AtomicBool);

    impl DspProcessor for Switchable {
        fn process_in_place(&self, _buffer: &mut [u8], _sample_count: usize) {}

        fn is_powered_on(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn powered_off_dsp_is_bound_but_inactive() {
        let context = RenderContext::new();
        assert!(!context.has_dsp());

        let dsp = Arc::new(Switchable(AtomicBool::new(false)));
        context.set_dsp(dsp.clone());
        assert!(context.has_dsp());
        assert!(context.active_dsp().is_none());

        dsp.0.store(true, Ordering::SeqCst);
        assert!(context.active_dsp().is_some());

        context.clear_dsp();
        assert!(!context.has_dsp());
        assert!(context.active_dsp().is_none());
    }
}
