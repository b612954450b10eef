//! SIP Endpoint Builder.

use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::transaction::TimerConfig;

/// Builder for creating a new SIP [`Endpoint`].
///
/// Must be built inside a tokio runtime: the endpoint spawns its timer
/// wheel and demultiplexer on creation.
pub struct Builder {
    name: String,
    timers: TimerConfig,
}

impl Builder {
    /// Creates a new default `Builder`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use sipua::*;
    /// # #[tokio::main] async fn main() {
    /// let endpoint = endpoint::Builder::new().with_name("My Endpoint").build();
    /// # }
    /// ```
    pub fn new() -> Self {
        Builder {
            name: String::new(),
            timers: TimerConfig::default(),
        }
    }

    /// Sets the endpoint name.
    pub fn with_name<T: AsRef<str>>(mut self, s: T) -> Self {
        self.name = s.as_ref().to_string();
        self
    }

    /// Overrides the base timer values (T1/T2/T4), typically to speed
    /// up tests.
    pub fn with_timers(mut self, timers: TimerConfig) -> Self {
        self.timers = timers;
        self
    }

    /// Overrides T1 only, scaling nothing else.
    pub fn with_t1(mut self, t1: Duration) -> Self {
        self.timers.t1 = t1;
        self
    }

    /// Finalizes the builder into an `Endpoint`.
    pub fn build(self) -> Endpoint {
        log::trace!("Creating endpoint '{}'", self.name);

        Endpoint::from_parts(self.name, self.timers)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
