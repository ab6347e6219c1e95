use std::fmt::{Display, Formatter};

use super::{Code, Log};

impl<T: Display> Display for Log<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Log::None => Ok(()),
            Log::Default(s) | Log::Success(s) | Log::Result(s) | Log::Verbose(s) => {
                write!(f, "{}", s)
            }
        }
    }
}

impl<T> Log<T> {
    /// Relative order of the log level; higher levels also print everything
    /// a lower level would.
    pub fn order(&self) -> u8 {
        match self {
            Log::None => 0,
            Log::Default(_) => 1,
            Log::Success(_) => 2,
            Log::Result(_) => 3,
            Log::Verbose(_) => 4,
        }
    }
}

impl<TL: Display> Log<TL> {
    /// Print a one-line success trace for a byte span, if the log level allows it.
    pub fn log_success(&self, code: &Code, start: usize, end: usize) {
        #[cfg(debug_assertions)]
        if self.order() >= Log::Success(()).order() {
            println!(
                "[{}; success]: {} - {}",
                self,
                code.obtain_position(start),
                code.obtain_position(end)
            )
        }
    }

    /// Print a one-line failure trace at a byte pointer, if the log level allows it.
    pub fn log_failure(&self, code: &Code, pointer: usize, message: &str) {
        #[cfg(debug_assertions)]
        if self.order() >= Log::Result(()).order() {
            println!(
                "[{}; failure]: at {}: {}",
                self,
                code.obtain_position(pointer),
                message
            )
        }
    }
}
