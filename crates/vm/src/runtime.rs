//! The runtime context shared by every thread.
//!
//! [`Runtime`] owns the global variable table, the collaborators the VM
//! calls out to and the requests built-ins raise for the scheduler.

use std::rc::Rc;

use rand::Rng;

use tickvm_common::{FunctionBody, NameResolver, ScriptImage, Value};

use crate::builtin::BuiltinRegistry;
use crate::error::Fault;
use crate::frame::{Thread, ThreadId};

/// Default size of the global variable table.
pub const DEFAULT_GLOBALS: usize = 256;

/// Default limit on frames per thread.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 1024;

/// Tunables fixed when a scheduler is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Number of global variable slots.
    pub globals: usize,
    /// Maximum frames in one thread's call chain.
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            globals: DEFAULT_GLOBALS,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

/// Supplies bytecode by function id. The VM never mutates what it loads.
pub trait ScriptLoader {
    fn load_function(&self, id: u32) -> Result<Rc<FunctionBody>, Fault>;

    /// String table entry for `LOAD_STRING`.
    fn string(&self, index: u32) -> Result<&str, Fault>;
}

impl ScriptLoader for ScriptImage {
    fn load_function(&self, id: u32) -> Result<Rc<FunctionBody>, Fault> {
        self.function(id).cloned().ok_or(Fault::UnknownFunction(id))
    }

    fn string(&self, index: u32) -> Result<&str, Fault> {
        self.strings
            .get(index as usize)
            .map(String::as_str)
            .ok_or(Fault::UnknownString(index))
    }
}

/// The embedding application, as seen from inside the VM.
pub trait Host: NameResolver {
    /// Whether speech audio is still playing. Polled for speech-gated waits.
    fn speech_playing(&self) -> bool {
        false
    }

    /// Function that handles combining two object types, if any.
    fn event_handler(&self, _first: u32, _second: u32) -> Option<u32> {
        None
    }

    /// A number in `0..bound`. `bound` is at least 1.
    fn random(&self, bound: u32) -> u32 {
        rand::thread_rng().gen_range(0..bound.max(1))
    }
}

/// A host with no names, no speech and no events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHost;

impl NameResolver for NullHost {}
impl Host for NullHost {}

/// Work a built-in asks the scheduler to do once the calling thread yields.
#[derive(Debug)]
pub(crate) enum Request {
    FreezeOthers { origin: ThreadId },
    Unfreeze,
    Cancel { function: u32 },
    Spawn(Thread),
    CompleteTimers,
}

/// State and collaborators shared by all threads.
pub struct Runtime {
    pub config: VmConfig,
    pub globals: Vec<Value>,
    pub loader: Box<dyn ScriptLoader>,
    pub builtins: BuiltinRegistry,
    pub host: Box<dyn Host>,
    /// How many freezes are in effect.
    pub freeze_depth: u32,
    pub(crate) next_thread: ThreadId,
    pub(crate) requests: Vec<Request>,
}

impl Runtime {
    pub fn new(
        loader: Box<dyn ScriptLoader>,
        builtins: BuiltinRegistry,
        host: Box<dyn Host>,
        config: VmConfig,
    ) -> Self {
        Self {
            config,
            globals: vec![Value::Nothing; config.globals],
            loader,
            builtins,
            host,
            freeze_depth: 0,
            next_thread: 1,
            requests: Vec::new(),
        }
    }

    pub(crate) fn allocate_thread_id(&mut self) -> ThreadId {
        let id = self.next_thread;
        self.next_thread += 1;
        id
    }

    pub fn global(&self, slot: u32) -> Result<&Value, Fault> {
        let len = self.globals.len();
        self.globals
            .get(slot as usize)
            .ok_or(Fault::SlotOutOfRange { slot, len })
    }

    pub fn global_mut(&mut self, slot: u32) -> Result<&mut Value, Fault> {
        let len = self.globals.len();
        self.globals
            .get_mut(slot as usize)
            .ok_or(Fault::SlotOutOfRange { slot, len })
    }

    /// Render a value using the host's names.
    pub fn text_of(&self, value: &Value) -> String {
        value.to_text(&*self.host)
    }
}
