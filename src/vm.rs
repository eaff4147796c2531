//! VM core - one heap, one call stack, fatal error escalation
//!
//! Cores never share objects. A heap error reported through a core halts
//! that core: its fatal handler runs once and every later allocation fails
//! with `CoreHalted`.

use crate::config::HeapConfig;
use crate::errors::{ErrorKind, HeapError, Result};
use crate::gc::{CallStack, FuncState, GcStats};
use crate::heap::Heap;
use crate::logging::log_fatal;
use crate::objects::{ArrayRef, ClassRef, ClosureRef, CoroutineRef, StructRef};

/// Receives the error that halted a core
pub trait FatalHandler: Send {
    fn on_fatal(&mut self, core: u32, error: &HeapError);
}

/// Default handler: log and keep the core halted
#[derive(Debug, Default)]
pub struct LogFatalHandler;

impl FatalHandler for LogFatalHandler {
    fn on_fatal(&mut self, core: u32, error: &HeapError) {
        log_fatal(core, error.code(), &error.to_string());
    }
}

pub struct Core {
    id: u32,
    heap: Heap,
    stack: CallStack,
    halted: Option<HeapError>,
    fatal: Box<dyn FatalHandler>,
}

impl Core {
    pub fn new(id: u32, config: HeapConfig) -> Result<Self> {
        Ok(Self {
            id,
            heap: Heap::new(id, config)?,
            stack: CallStack::new(),
            halted: None,
            fatal: Box::new(LogFatalHandler),
        })
    }

    pub fn with_fatal_handler(mut self, handler: impl FatalHandler + 'static) -> Self {
        self.fatal = Box::new(handler);
        self
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut CallStack {
        &mut self.stack
    }

    /// Innermost frame
    pub fn frame(&self) -> &FuncState {
        self.stack.current()
    }

    pub fn frame_mut(&mut self) -> &mut FuncState {
        self.stack.current_mut()
    }

    pub fn stats(&self) -> GcStats {
        self.heap.stats()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<&HeapError> {
        self.halted.as_ref()
    }

    fn ensure_running(&self) -> Result<()> {
        match self.halted {
            Some(_) => Err(HeapError::new(ErrorKind::CoreHalted, self.id)),
            None => Ok(()),
        }
    }

    /// Halt the core on any error in `result`
    pub fn escalate<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(error) = &result {
            if self.halted.is_none() && error.kind != ErrorKind::CoreHalted {
                self.fatal.on_fatal(self.id, error);
                self.halted = Some(error.clone());
            }
        }
        result
    }

    // ===== Allocation =====

    pub fn allocate_struct(&mut self, field_count: usize, data_size: usize) -> Result<StructRef> {
        self.ensure_running()?;
        let result = self.heap.allocate_struct(&mut self.stack, field_count, data_size);
        self.escalate(result)
    }

    pub fn allocate_class(
        &mut self,
        method_count: usize,
        attr_count: usize,
        data_size: usize,
        class_id: u32,
    ) -> Result<ClassRef> {
        self.ensure_running()?;
        let result = self
            .heap
            .allocate_class(&mut self.stack, method_count, attr_count, data_size, class_id);
        self.escalate(result)
    }

    pub fn allocate_array(&mut self, is_pointer_container: bool, length: usize, element_size: usize) -> Result<ArrayRef> {
        self.ensure_running()?;
        let result = self
            .heap
            .allocate_array(&mut self.stack, is_pointer_container, length, element_size);
        self.escalate(result)
    }

    pub fn allocate_closure(&mut self, function_address: u64, arg_offset: u8, env_size: usize) -> Result<ClosureRef> {
        self.ensure_running()?;
        let result = self
            .heap
            .allocate_closure(&mut self.stack, function_address, arg_offset, env_size);
        self.escalate(result)
    }

    pub fn allocate_coroutine(&mut self, closure: ClosureRef) -> Result<CoroutineRef> {
        self.ensure_running()?;
        let result = self.heap.allocate_coroutine(&mut self.stack, closure);
        self.escalate(result)
    }

    pub fn allocate_raw(&mut self, size: usize) -> Result<usize> {
        self.ensure_running()?;
        let result = self.heap.allocate_raw(&mut self.stack, size);
        self.escalate(result)
    }

    // ===== Coroutines =====

    /// Push the coroutine's saved frame; returns the instruction to continue at
    pub fn resume(&mut self, coroutine: CoroutineRef) -> Result<u64> {
        self.ensure_running()?;
        let result = coroutine.resume(&mut self.heap);
        let (frame, resume_ip) = self.escalate(result)?;
        self.stack.push_frame(frame);
        Ok(resume_ip)
    }

    /// A running coroutine's frame always sits above the base frame
    fn ensure_coroutine_frame(&self, coroutine: CoroutineRef) -> Result<()> {
        if self.stack.depth() > 1 {
            return Ok(());
        }
        let found = coroutine.state(&self.heap)?;
        Err(HeapError::new(
            ErrorKind::CoroutineState { expected: "running above the base frame", found },
            self.id,
        ))
    }

    /// Save the innermost frame into the coroutine and pop it
    pub fn coroutine_yield(&mut self, coroutine: CoroutineRef, resume_ip: u64) -> Result<()> {
        self.ensure_running()?;
        let result = self
            .ensure_coroutine_frame(coroutine)
            .and_then(|()| coroutine.suspend(&mut self.heap, self.stack.current(), resume_ip));
        self.escalate(result)?;
        self.stack.pop_frame();
        Ok(())
    }

    /// Mark the coroutine finished and pop its frame
    pub fn finish(&mut self, coroutine: CoroutineRef) -> Result<()> {
        self.ensure_running()?;
        let result = self
            .ensure_coroutine_frame(coroutine)
            .and_then(|()| coroutine.finish(&mut self.heap));
        self.escalate(result)?;
        self.stack.pop_frame();
        Ok(())
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("id", &self.id)
            .field("depth", &self.stack.depth())
            .field("halted", &self.halted)
            .field("heap", &self.heap)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::CoroutineState;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<i32>>>);

    impl FatalHandler for Recorder {
        fn on_fatal(&mut self, _core: u32, error: &HeapError) {
            if let Ok(mut codes) = self.0.lock() {
                codes.push(error.code());
            }
        }
    }

    #[test]
    fn test_error_halts_core_once() {
        let codes = Arc::new(Mutex::new(Vec::new()));
        let mut core = Core::new(2, HeapConfig::compact())
            .unwrap()
            .with_fatal_handler(Recorder(Arc::clone(&codes)));

        let err = core.allocate_array(true, 4, 4).unwrap_err();
        assert_eq!(err.code(), 6);
        assert!(core.is_halted());

        let err = core.allocate_raw(8).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CoreHalted);
        assert_eq!(*codes.lock().unwrap(), vec![6]);
        assert_eq!(core.halt_reason().map(HeapError::code), Some(6));
    }

    #[test]
    fn test_coroutine_round_trip_through_stack() {
        let mut core = Core::new(0, HeapConfig::compact()).unwrap();
        let closure = core.allocate_closure(0x4000, 0, 1).unwrap();
        closure
            .set_upvalue(core.heap_mut(), 0, crate::gc::Slot::Int(11))
            .unwrap();
        let co = core.allocate_coroutine(closure).unwrap();

        let ip = core.resume(co).unwrap();
        assert_eq!(ip, 0x4000);
        assert_eq!(core.stack().depth(), 2);
        assert_eq!(core.frame().get(0), 11);

        core.frame_mut().set_int(1, 99);
        core.coroutine_yield(co, 0x4010).unwrap();
        assert_eq!(core.stack().depth(), 1);
        assert_eq!(co.state(core.heap()).unwrap(), CoroutineState::Suspended);

        assert_eq!(core.resume(co).unwrap(), 0x4010);
        assert_eq!(core.frame().get(1), 99);
        core.finish(co).unwrap();
        assert_eq!(co.state(core.heap()).unwrap(), CoroutineState::Finished);
        assert_eq!(core.stack().depth(), 1);
    }

    #[test]
    fn test_yield_from_base_frame_is_rejected() {
        let mut core = Core::new(0, HeapConfig::compact()).unwrap();
        let closure = core.allocate_closure(0x4000, 0, 0).unwrap();
        let co = core.allocate_coroutine(closure).unwrap();
        core.resume(co).unwrap();
        core.stack_mut().pop_frame();
        core.frame_mut().set_int(0, 7);

        let err = core.coroutine_yield(co, 0x4010).unwrap_err();
        assert_eq!(err.code(), 8);
        assert_eq!(
            err.kind,
            ErrorKind::CoroutineState { expected: "running above the base frame", found: CoroutineState::Running }
        );
        assert_eq!(core.stack().depth(), 1);
        assert_eq!(core.frame().get(0), 7);
        assert_eq!(co.state(core.heap()).unwrap(), CoroutineState::Running);
        assert!(core.is_halted());
    }
}
