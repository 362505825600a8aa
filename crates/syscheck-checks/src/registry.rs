use std::collections::HashMap;
use std::sync::Arc;

use crate::email::EmailRoundtripCheck;
use crate::executable::Executable;
use crate::http::HttpCheck;
use crate::tcp::TcpConnectCheck;

/// Check type → executor.
#[derive(Clone, Default)]
pub struct CheckRegistry {
    executors: HashMap<String, Arc<dyn Executable>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every check kind this crate ships.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EmailRoundtripCheck::new()));
        registry.register(Arc::new(HttpCheck::new()));
        registry.register(Arc::new(TcpConnectCheck));
        registry
    }

    /// Register under the executor's own `check_type`, replacing any previous one.
    pub fn register(&mut self, executor: Arc<dyn Executable>) {
        self.executors
            .insert(executor.check_type().to_string(), executor);
    }

    pub fn get(&self, check_type: &str) -> Option<Arc<dyn Executable>> {
        self.executors.get(check_type).cloned()
    }

    pub fn check_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
