//! Naming and destination policies.
//!
//! Policies are registered explicitly by id. For each decision the
//! registry asks them in rank order: the configured default first, then
//! by configured priority, then by id. A policy may accept, decline (the
//! next one is asked) or cancel (nobody else is asked).

mod template;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::config::PoliciesConfig;
use crate::error::ConfigError;
use crate::model::{ContentRecord, Episode, PlacementRecord, Series, StorageLocation};

pub use template::{sanitize_component, TemplatePolicy, TemplatePolicyFactory, VariableEngine};

/// Everything a policy may look at for one placement.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    pub placement: &'a PlacementRecord,
    pub location: &'a StorageLocation,
    pub content: &'a ContentRecord,
    /// Series of the first association, if the content is identified.
    pub series: Option<&'a Series>,
    pub episodes: &'a [Episode],
    /// Every known location, for destination lookups.
    pub locations: &'a [StorageLocation],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision<T> {
    Accept(T),
    Decline,
    /// Stop asking policies for this decision.
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub location_id: i64,
    /// `/` separated, relative to the location root. Empty means the root.
    pub relative_dir: String,
}

pub trait NamingPolicy: Send {
    fn id(&self) -> &str;

    /// New file name, extension included.
    fn get_filename(&mut self, ctx: &PolicyContext<'_>) -> PolicyDecision<String>;

    fn get_destination(&mut self, ctx: &PolicyContext<'_>) -> PolicyDecision<Destination>;
}

/// Creates a fresh policy instance per decision.
pub trait NamingPolicyFactory: Send + Sync {
    fn id(&self) -> &str;

    fn create(&self) -> Box<dyn NamingPolicy>;
}

pub struct PolicyRegistry {
    factories: BTreeMap<String, Arc<dyn NamingPolicyFactory>>,
    default: Option<String>,
    priorities: HashMap<String, u32>,
    disabled: HashSet<String>,
}

impl PolicyRegistry {
    /// An empty registry ranked by `settings`.
    pub fn new(settings: &PoliciesConfig) -> Self {
        Self {
            factories: BTreeMap::new(),
            default: settings.default.clone(),
            priorities: settings.priorities.clone(),
            disabled: settings.disabled.iter().cloned().collect(),
        }
    }

    /// A registry with the built-in template policy registered.
    pub fn with_builtin(settings: &PoliciesConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::new(settings);
        let template = TemplatePolicyFactory::new(&settings.template).map_err(|e| {
            ConfigError::Validation {
                message: format!("Template policy: {}", e),
            }
        })?;
        registry.register(Arc::new(template));
        Ok(registry)
    }

    /// Registers a factory, replacing any previous one with the same id.
    pub fn register(&mut self, factory: Arc<dyn NamingPolicyFactory>) {
        let id = factory.id().to_string();
        if self.factories.insert(id.clone(), factory).is_some() {
            log::warn!("Policy '{}' registered twice, keeping the latest", id);
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Enabled factories in the order they are asked.
    pub fn ranked(&self) -> Vec<Arc<dyn NamingPolicyFactory>> {
        let mut ranked: Vec<_> = self
            .factories
            .iter()
            .filter(|(id, _)| !self.disabled.contains(*id))
            .collect();
        ranked.sort_by_key(|(id, _)| {
            let is_default = self.default.as_deref() == Some(id.as_str());
            let priority = self.priorities.get(*id).copied().unwrap_or(u32::MAX);
            (!is_default, priority, (*id).clone())
        });
        ranked.into_iter().map(|(_, f)| Arc::clone(f)).collect()
    }

    /// First accepted, non-empty file name.
    pub fn resolve_filename(&self, ctx: &PolicyContext<'_>) -> PolicyDecision<String> {
        for factory in self.ranked() {
            let mut policy = factory.create();
            match policy.get_filename(ctx) {
                PolicyDecision::Accept(name) if !name.trim().is_empty() => {
                    log::debug!("Policy '{}' named placement {}: {}", policy.id(), ctx.placement.id, name);
                    return PolicyDecision::Accept(name);
                }
                PolicyDecision::Accept(_) | PolicyDecision::Decline => continue,
                PolicyDecision::Cancel => {
                    log::debug!("Policy '{}' cancelled renaming placement {}", policy.id(), ctx.placement.id);
                    return PolicyDecision::Cancel;
                }
            }
        }
        PolicyDecision::Decline
    }

    /// First accepted destination that names a known location.
    pub fn resolve_destination(&self, ctx: &PolicyContext<'_>) -> PolicyDecision<Destination> {
        for factory in self.ranked() {
            let mut policy = factory.create();
            match policy.get_destination(ctx) {
                PolicyDecision::Accept(dest) => {
                    if ctx.locations.iter().any(|l| l.id == dest.location_id) {
                        return PolicyDecision::Accept(dest);
                    }
                    log::warn!(
                        "Policy '{}' chose unknown location {}, skipping",
                        policy.id(),
                        dest.location_id
                    );
                }
                PolicyDecision::Decline => continue,
                PolicyDecision::Cancel => return PolicyDecision::Cancel,
            }
        }
        PolicyDecision::Decline
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Policy returning fixed answers and recording that it was asked.
    pub(crate) struct FixedPolicy {
        pub id: String,
        pub filename: PolicyDecision<String>,
        pub destination: PolicyDecision<Destination>,
        pub asked: Arc<Mutex<Vec<String>>>,
    }

    impl NamingPolicyFactory for FixedPolicy {
        fn id(&self) -> &str {
            &self.id
        }

        fn create(&self) -> Box<dyn NamingPolicy> {
            Box::new(FixedInstance {
                id: self.id.clone(),
                filename: self.filename.clone(),
                destination: self.destination.clone(),
                asked: Arc::clone(&self.asked),
            })
        }
    }

    struct FixedInstance {
        id: String,
        filename: PolicyDecision<String>,
        destination: PolicyDecision<Destination>,
        asked: Arc<Mutex<Vec<String>>>,
    }

    impl NamingPolicy for FixedInstance {
        fn id(&self) -> &str {
            &self.id
        }

        fn get_filename(&mut self, _ctx: &PolicyContext<'_>) -> PolicyDecision<String> {
            self.asked.lock().unwrap().push(self.id.clone());
            self.filename.clone()
        }

        fn get_destination(&mut self, _ctx: &PolicyContext<'_>) -> PolicyDecision<Destination> {
            self.asked.lock().unwrap().push(self.id.clone());
            self.destination.clone()
        }
    }

    fn fixed(
        id: &str,
        filename: PolicyDecision<String>,
        asked: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<FixedPolicy> {
        Arc::new(FixedPolicy {
            id: id.to_string(),
            filename,
            destination: PolicyDecision::Decline,
            asked: Arc::clone(asked),
        })
    }

    struct Fixture {
        placement: PlacementRecord,
        location: StorageLocation,
        content: ContentRecord,
    }

    fn fixture() -> Fixture {
        Fixture {
            placement: PlacementRecord {
                id: 1,
                location_id: 1,
                relative_path: "show.mkv".into(),
                content_id: 1,
            },
            location: StorageLocation {
                id: 1,
                name: "Drop".into(),
                root_path: PathBuf::from("/drop"),
                cloud_id: None,
                is_drop_source: true,
                is_drop_destination: false,
            },
            content: ContentRecord {
                id: 1,
                hash: "abc".into(),
                file_size: 3,
                duration_ms: None,
                media_info: None,
                is_ignored: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    impl Fixture {
        fn ctx<'a>(&'a self, locations: &'a [StorageLocation]) -> PolicyContext<'a> {
            PolicyContext {
                placement: &self.placement,
                location: &self.location,
                content: &self.content,
                series: None,
                episodes: &[],
                locations,
            }
        }
    }

    #[test]
    fn test_ranking_default_then_priority_then_id() {
        let mut settings = PoliciesConfig::default();
        settings.default = Some("zeta".into());
        settings.priorities.insert("beta".into(), 1);
        settings.priorities.insert("alpha".into(), 5);
        let asked = Arc::new(Mutex::new(Vec::new()));

        let mut registry = PolicyRegistry::new(&settings);
        for id in ["alpha", "beta", "gamma", "delta", "zeta"] {
            registry.register(fixed(id, PolicyDecision::Decline, &asked));
        }

        let order: Vec<String> = registry.ranked().iter().map(|f| f.id().to_string()).collect();
        assert_eq!(order, vec!["zeta", "beta", "alpha", "delta", "gamma"]);
    }

    #[test]
    fn test_disabled_policies_are_skipped() {
        let mut settings = PoliciesConfig::default();
        settings.disabled = vec!["a".into()];
        let asked = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PolicyRegistry::new(&settings);
        registry.register(fixed("a", PolicyDecision::Accept("x.mkv".into()), &asked));
        registry.register(fixed("b", PolicyDecision::Accept("y.mkv".into()), &asked));

        let f = fixture();
        assert_eq!(
            registry.resolve_filename(&f.ctx(&[])),
            PolicyDecision::Accept("y.mkv".into())
        );
        assert_eq!(*asked.lock().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_decline_falls_through_and_cancel_stops() {
        let asked = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PolicyRegistry::new(&PoliciesConfig::default());
        registry.register(fixed("a", PolicyDecision::Decline, &asked));
        registry.register(fixed("b", PolicyDecision::Cancel, &asked));
        registry.register(fixed("c", PolicyDecision::Accept("z.mkv".into()), &asked));

        let f = fixture();
        assert_eq!(registry.resolve_filename(&f.ctx(&[])), PolicyDecision::Cancel);
        assert_eq!(*asked.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_empty_name_counts_as_decline() {
        let asked = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PolicyRegistry::new(&PoliciesConfig::default());
        registry.register(fixed("a", PolicyDecision::Accept("  ".into()), &asked));
        registry.register(fixed("b", PolicyDecision::Accept("ok.mkv".into()), &asked));

        let f = fixture();
        assert_eq!(
            registry.resolve_filename(&f.ctx(&[])),
            PolicyDecision::Accept("ok.mkv".into())
        );
    }

    #[test]
    fn test_unknown_destination_location_is_skipped() {
        let asked = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PolicyRegistry::new(&PoliciesConfig::default());
        registry.register(Arc::new(FixedPolicy {
            id: "a".into(),
            filename: PolicyDecision::Decline,
            destination: PolicyDecision::Accept(Destination {
                location_id: 99,
                relative_dir: "Show".into(),
            }),
            asked: Arc::clone(&asked),
        }));
        registry.register(Arc::new(FixedPolicy {
            id: "b".into(),
            filename: PolicyDecision::Decline,
            destination: PolicyDecision::Accept(Destination {
                location_id: 1,
                relative_dir: "Show".into(),
            }),
            asked: Arc::clone(&asked),
        }));

        let f = fixture();
        let locations = vec![f.location.clone()];
        assert_eq!(
            registry.resolve_destination(&f.ctx(&locations)),
            PolicyDecision::Accept(Destination {
                location_id: 1,
                relative_dir: "Show".into()
            })
        );
    }

    #[test]
    fn test_builtin_registers_template() {
        let registry = PolicyRegistry::with_builtin(&PoliciesConfig::default()).unwrap();
        assert_eq!(registry.ids(), vec!["template".to_string()]);
    }
}
