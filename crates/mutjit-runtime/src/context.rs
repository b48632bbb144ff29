//! Per-store state shared between JIT code and the host.

/// A function registered to run after the test entry returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destructor {
    /// Address of the function to call
    pub function: u64,
    /// Argument passed to `__cxa_atexit`-style registrations
    pub argument: Option<i32>,
}

/// Data owned by the store of one loaded image
#[derive(Debug, Default)]
pub struct ImageState {
    /// `mapping[f]` is the caller that first invoked `f`, `f` itself for
    /// top-level invocations and 0 when `f` never ran
    pub call_tree_mapping: Vec<u64>,
    pub call_stack: Vec<u64>,
    pub destructors: Vec<Destructor>,
    /// Bytes written through the image's output symbols
    pub output: Vec<u8>,
}

impl ImageState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear per-run state before a test executes
    pub fn reset_run(&mut self) {
        self.call_stack.clear();
        self.destructors.clear();
        self.output.clear();
    }

    /// Start recording a fresh call-tree mapping of `size` entries
    pub fn begin_trace(&mut self, size: usize) {
        self.call_tree_mapping = vec![0; size];
        self.call_stack.clear();
    }

    pub fn take_mapping(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.call_tree_mapping)
    }

    pub fn enter_function(&mut self, index: u64) {
        if let Some(slot) = self.call_tree_mapping.get_mut(index as usize) {
            if *slot == 0 {
                *slot = self.call_stack.last().copied().unwrap_or(index);
            }
        }
        self.call_stack.push(index);
    }

    pub fn leave_function(&mut self, _index: u64) {
        self.call_stack.pop();
    }

    pub fn take_output(&mut self) -> String {
        let bytes = std::mem::take(&mut self.output);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_records_first_caller() {
        let mut state = ImageState::new();
        state.begin_trace(4);

        state.enter_function(1);
        state.enter_function(2);
        state.enter_function(3);
        state.leave_function(3);
        state.leave_function(2);
        // a second caller does not overwrite the first
        state.enter_function(3);
        state.leave_function(3);
        state.leave_function(1);

        assert_eq!(state.take_mapping(), vec![0, 1, 1, 2]);
        assert!(state.call_stack.is_empty());
    }

    #[test]
    fn test_untraced_indices_are_ignored() {
        let mut state = ImageState::new();
        state.enter_function(7);
        assert!(state.call_tree_mapping.is_empty());
        assert_eq!(state.call_stack, vec![7]);
    }

    #[test]
    fn test_reset_run() {
        let mut state = ImageState::new();
        state.output.extend_from_slice(b"ok");
        state.destructors.push(Destructor {
            function: 3,
            argument: None,
        });
        assert_eq!(state.take_output(), "ok");
        state.reset_run();
        assert!(state.destructors.is_empty());
    }
}
