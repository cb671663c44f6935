use tokio_util::sync::CancellationToken;

/// Issued once per user-initiated query. Work captures the token at dispatch
/// and may only apply its result while the token is still current.
#[derive(Debug, Clone)]
pub struct GenerationToken {
    value: u64,
    cancel: CancellationToken,
}

impl GenerationToken {
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Resolves once a newer generation has started. Used to abort in-flight
    /// requests early; correctness never depends on it.
    pub async fn superseded(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_superseded(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token whose cancellation also follows this generation.
    pub fn child(&self) -> CancellationToken {
        self.cancel.child_token()
    }
}

impl PartialEq for GenerationToken {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

/// Monotonic query counter owned by a session.
#[derive(Debug)]
pub struct QueryGeneration {
    current: GenerationToken,
}

impl QueryGeneration {
    pub fn new() -> Self {
        Self {
            current: GenerationToken {
                value: 0,
                cancel: CancellationToken::new(),
            },
        }
    }

    /// Start a new generation, cancelling everything tied to the previous one.
    pub fn new_generation(&mut self) -> GenerationToken {
        self.current.cancel.cancel();
        self.current = GenerationToken {
            value: self.current.value + 1,
            cancel: CancellationToken::new(),
        };
        self.current.clone()
    }

    pub fn is_current(&self, token: &GenerationToken) -> bool {
        token.value == self.current.value
    }

    pub fn current(&self) -> &GenerationToken {
        &self.current
    }
}

impl Default for QueryGeneration {
    fn default() -> Self {
        Self::new()
    }
}
