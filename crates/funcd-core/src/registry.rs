// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function name to handler routing.
//!
//! A name maps to an optional direct handler plus any number of prefix
//! routes. When prefix routes exist, the request's first argument selects
//! among them. Every resolution also yields the schedule key that serializes
//! invocations of the same route.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{error, info, warn};

use crate::handler::{FunctionCall, Handler};

/// Discriminator for names with prefix routes but no matching prefix.
pub const SCHEDULE_KEY_UNMATCHED: &str = "__unmatched__";
/// Discriminator for names with neither a direct handler nor a match.
pub const SCHEDULE_KEY_DIRECT_MISSING: &str = "__direct_missing__";
/// Discriminator for names absent from the registry.
pub const SCHEDULE_KEY_UNREGISTERED: &str = "__unregistered__";

/// A resolved handler and the key its invocations serialize on.
#[derive(Clone)]
pub struct Route {
    /// Handler to run.
    pub handler: Handler,
    /// Serialization key.
    pub schedule_key: String,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("schedule_key", &self.schedule_key)
            .finish_non_exhaustive()
    }
}

/// Resolves function names to routes.
pub trait Registry: Send + Sync {
    /// Resolve `name`, using `first_arg` for prefix routing.
    ///
    /// `None` means the name is not registered at all.
    fn resolve(&self, name: &str, first_arg: Option<&str>) -> Option<Route>;
}

/// Compose a schedule key from a name and an optional discriminator.
pub fn route_schedule_key(name: &str, discriminator: &str) -> String {
    if discriminator.is_empty() {
        name.to_string()
    } else {
        format!("{name}|{discriminator}")
    }
}

/// Handler answering 503 for names that are registered but cannot route.
pub fn unknown_function_handler() -> Handler {
    Arc::new(|call: FunctionCall| {
        let message = format!(
            "unknown function '{}' ({:?})",
            call.function.name, call.function.args
        );
        call.respond(503, &message);
    })
}

/// Handler answering 501 for names absent from the registry.
pub fn unregistered_function_handler() -> Handler {
    Arc::new(|call: FunctionCall| {
        let message = format!("unregistered function: {}", call.function.name);
        call.respond(501, &message);
    })
}

#[derive(Clone, Default)]
struct FunctionSet {
    direct: Option<Handler>,
    prefixes: BTreeMap<String, Handler>,
}

impl FunctionSet {
    fn is_empty(&self) -> bool {
        self.direct.is_none() && self.prefixes.is_empty()
    }

    fn route(&self, name: &str, first_arg: Option<&str>) -> Route {
        if !self.prefixes.is_empty() {
            let matched = first_arg.and_then(|arg| {
                self.prefixes
                    .iter()
                    .find(|(prefix, _)| arg.starts_with(prefix.as_str()))
            });
            return match matched {
                Some((prefix, handler)) => Route {
                    handler: handler.clone(),
                    schedule_key: route_schedule_key(name, prefix),
                },
                None => Route {
                    handler: unknown_function_handler(),
                    schedule_key: route_schedule_key(name, SCHEDULE_KEY_UNMATCHED),
                },
            };
        }

        match &self.direct {
            Some(handler) => Route {
                handler: handler.clone(),
                schedule_key: route_schedule_key(name, ""),
            },
            None => Route {
                handler: unknown_function_handler(),
                schedule_key: route_schedule_key(name, SCHEDULE_KEY_DIRECT_MISSING),
            },
        }
    }
}

/// In-memory registry with direct and prefix routes.
///
/// Registration may happen while the manager runs; each resolution works on
/// a snapshot taken under the lock.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: RwLock<HashMap<String, FunctionSet>>,
}

impl FunctionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the direct handler for `name`, replacing any previous one.
    pub fn register(&self, name: &str, handler: Handler) {
        let mut functions = self.write();
        let set = functions.entry(name.to_string()).or_default();
        if set.direct.is_some() {
            warn!(function = %name, "Replacing existing function handler");
        }
        set.direct = Some(handler);
        info!(function = %name, "Registered function");
    }

    /// Remove `name` with all its routes.
    pub fn unregister(&self, name: &str) {
        if self.write().remove(name).is_some() {
            info!(function = %name, "Unregistered function");
        }
    }

    /// Register a prefix route for `name`.
    ///
    /// Returns `false` when the prefix is empty or overlaps an existing
    /// prefix of the same name. Registering the same prefix again replaces
    /// its handler.
    pub fn register_prefix(&self, name: &str, prefix: &str, handler: Handler) -> bool {
        if prefix.is_empty() {
            warn!(function = %name, "Rejecting empty function prefix");
            return false;
        }

        let mut functions = self.write();
        let set = functions.entry(name.to_string()).or_default();

        if set.prefixes.contains_key(prefix) {
            warn!(function = %name, prefix = %prefix, "Replacing existing function prefix handler");
            set.prefixes.insert(prefix.to_string(), handler);
            return true;
        }

        if let Some(existing) = set
            .prefixes
            .keys()
            .find(|existing| existing.starts_with(prefix) || prefix.starts_with(existing.as_str()))
        {
            error!(
                function = %name,
                prefix = %prefix,
                existing = %existing,
                "Function prefix overlaps an existing prefix"
            );
            return false;
        }

        set.prefixes.insert(prefix.to_string(), handler);
        info!(function = %name, prefix = %prefix, "Registered function prefix");
        true
    }

    /// Remove one prefix route; drops the name once nothing is left.
    pub fn unregister_prefix(&self, name: &str, prefix: &str) {
        let mut functions = self.write();
        let Some(set) = functions.get_mut(name) else {
            return;
        };
        if set.prefixes.remove(prefix).is_some() {
            info!(function = %name, prefix = %prefix, "Unregistered function prefix");
        }
        if set.is_empty() {
            functions.remove(name);
        }
    }

    /// Whether `name` has any route.
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, FunctionSet>> {
        self.functions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, FunctionSet>> {
        self.functions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Registry for FunctionRegistry {
    fn resolve(&self, name: &str, first_arg: Option<&str>) -> Option<Route> {
        let snapshot = self.read().get(name).cloned()?;
        Some(snapshot.route(name, first_arg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finalizer::Responder;
    use crate::output::ResultWriter;
    use crate::protocol::Function;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn counting_handler(counter: &Arc<AtomicUsize>) -> Handler {
        let counter = counter.clone();
        Arc::new(move |_call| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn call_with(function: Function, capture: &Capture) -> FunctionCall {
        FunctionCall::new(
            function,
            CancellationToken::new(),
            Responder::direct(ResultWriter::new(capture.clone())),
        )
    }

    #[test]
    fn test_route_schedule_key() {
        assert_eq!(route_schedule_key("fn", ""), "fn");
        assert_eq!(route_schedule_key("fn", "pre"), "fn|pre");
        assert_eq!(route_schedule_key("fn", SCHEDULE_KEY_UNMATCHED), "fn|__unmatched__");
    }

    #[test]
    fn test_resolve_unregistered() {
        let registry = FunctionRegistry::new();
        assert!(registry.resolve("missing", None).is_none());
    }

    #[test]
    fn test_resolve_direct() {
        let registry = FunctionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.register("fn", counting_handler(&hits));

        let route = registry.resolve("fn", Some("arg")).unwrap();
        assert_eq!(route.schedule_key, "fn");
        (route.handler)(call_with(Function::new("tx1", "fn"), &Capture::default()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_prefix_routes() {
        let registry = FunctionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        assert!(registry.register_prefix("fn", "abc", counting_handler(&hits)));

        let route = registry.resolve("fn", Some("abcdef")).unwrap();
        assert_eq!(route.schedule_key, "fn|abc");

        let unmatched = registry.resolve("fn", Some("xyz")).unwrap();
        assert_eq!(unmatched.schedule_key, "fn|__unmatched__");

        let no_arg = registry.resolve("fn", None).unwrap();
        assert_eq!(no_arg.schedule_key, "fn|__unmatched__");
    }

    #[test]
    fn test_prefix_routes_take_precedence_over_direct() {
        let registry = FunctionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.register("fn", counting_handler(&hits));
        assert!(registry.register_prefix("fn", "abc", counting_handler(&hits)));

        assert_eq!(registry.resolve("fn", Some("zzz")).unwrap().schedule_key, "fn|__unmatched__");
    }

    #[test]
    fn test_register_prefix_rejects_empty_and_overlap() {
        let registry = FunctionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        assert!(!registry.register_prefix("fn", "", counting_handler(&hits)));
        assert!(!registry.contains("fn"));

        assert!(registry.register_prefix("fn", "abc", counting_handler(&hits)));
        assert!(!registry.register_prefix("fn", "ab", counting_handler(&hits)));
        assert!(!registry.register_prefix("fn", "abcd", counting_handler(&hits)));
        assert!(registry.register_prefix("fn", "abc", counting_handler(&hits)));
        assert!(registry.register_prefix("fn", "xyz", counting_handler(&hits)));
    }

    #[test]
    fn test_unregister_prefix_drops_empty_name() {
        let registry = FunctionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.register_prefix("fn", "abc", counting_handler(&hits));
        registry.unregister_prefix("fn", "abc");
        assert!(!registry.contains("fn"));

        registry.register("other", counting_handler(&hits));
        registry.register_prefix("other", "p", counting_handler(&hits));
        registry.unregister_prefix("other", "p");
        assert_eq!(registry.resolve("other", None).unwrap().schedule_key, "other");
    }

    #[test]
    fn test_unregister() {
        let registry = FunctionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        registry.register("fn", counting_handler(&hits));
        registry.unregister("fn");
        assert!(registry.resolve("fn", None).is_none());
    }

    #[test]
    fn test_unknown_function_handler_responds_503() {
        let capture = Capture::default();
        let mut function = Function::new("tx1", "fn");
        function.args = vec!["zzz".to_string()];
        unknown_function_handler()(call_with(function, &capture));

        let text = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(text.starts_with("FUNCTION_RESULT_BEGIN tx1 503 application/json"));
        assert!(text.contains("unknown function 'fn'"));
    }

    #[test]
    fn test_unregistered_function_handler_responds_501() {
        let capture = Capture::default();
        unregistered_function_handler()(call_with(Function::new("tx2", "nope"), &capture));

        let text = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        assert!(text.starts_with("FUNCTION_RESULT_BEGIN tx2 501"));
        assert!(text.contains("unregistered function: nope"));
    }
}
