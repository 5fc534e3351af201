mod backend;
mod layout;
mod output;
mod resolver;
mod session;
mod traced;

pub use backend::{Backend, LineLookup, Registers, StopStatus, Tracee};
pub use layout::AddressLayout;
pub use output::{DEFAULT_OUTPUT_CAPACITY, OutputCapture};
pub use resolver::{
    Addr2Line, DEFAULT_RESOLVER, DEFAULT_RESOLVER_TIMEOUT, Resolution, parse_line_number,
};
pub use session::{
    DEFAULT_STARTUP_BUDGET, DEFAULT_STEP_BUDGET, Fault, Session, SessionConfig, SessionState,
    StepOutcome, state_string,
};
pub use traced::{NativeBackend, PtraceTracee};
