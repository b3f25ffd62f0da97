use std::collections::HashMap;
use std::path::Path;

use chrono::{Datelike, NaiveDate, Utc};
use regex::{Captures, Regex};

use super::{Destination, NamingPolicy, NamingPolicyFactory, PolicyContext, PolicyDecision};
use crate::config::TemplateConfig;

pub const TEMPLATE_POLICY_ID: &str = "template";

/// Expands `$name` tokens in one pass, so substituted values are never
/// expanded again.
#[derive(Debug, Clone)]
pub struct VariableEngine {
    token: Regex,
}

impl VariableEngine {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token: Regex::new(r"\$(series|episode|title|original|ext|y|m|d)")?,
        })
    }

    /// Built-in variables for one placement.
    pub fn variables(&self, ctx: &PolicyContext<'_>) -> HashMap<String, String> {
        let mut vars = HashMap::new();

        let file_name = ctx.placement.file_name();
        let path = Path::new(file_name);
        let original = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name);
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        vars.insert("original".to_string(), original.to_string());
        vars.insert("ext".to_string(), ext.to_string());

        if let Some(series) = ctx.series {
            vars.insert("series".to_string(), series.name.clone());
        }

        let episode = ctx.episodes.first();
        if let Some(episode) = episode {
            vars.insert("episode".to_string(), format!("{:02}", episode.number));
            vars.insert("title".to_string(), episode.title.clone());
        }

        let date: NaiveDate = episode
            .and_then(|e| e.air_date)
            .unwrap_or_else(|| Utc::now().date_naive());
        vars.insert("y".to_string(), format!("{:04}", date.year()));
        vars.insert("m".to_string(), format!("{:02}", date.month()));
        vars.insert("d".to_string(), format!("{:02}", date.day()));

        vars
    }

    /// Unknown tokens are left as written.
    pub fn substitute(&self, template: &str, vars: &HashMap<String, String>) -> String {
        self.token
            .replace_all(template, |caps: &Captures| {
                vars.get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// Makes one path component safe on every filesystem we write to.
pub fn sanitize_component(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_matches(|c: char| c.is_whitespace() || c == '.')
        .to_string()
}

/// Renders the configured `filename` and `directory` templates.
///
/// Declines for content that has no series yet, and for decisions
/// without a template.
pub struct TemplatePolicy {
    engine: VariableEngine,
    filename: Option<String>,
    directory: Option<String>,
}

impl NamingPolicy for TemplatePolicy {
    fn id(&self) -> &str {
        TEMPLATE_POLICY_ID
    }

    fn get_filename(&mut self, ctx: &PolicyContext<'_>) -> PolicyDecision<String> {
        let Some(template) = self.filename.as_deref() else {
            return PolicyDecision::Decline;
        };
        if ctx.series.is_none() {
            return PolicyDecision::Decline;
        }

        let vars = self.engine.variables(ctx);
        let mut name = sanitize_component(&self.engine.substitute(template, &vars));
        if name.is_empty() {
            return PolicyDecision::Decline;
        }

        let ext = vars.get("ext").map(String::as_str).unwrap_or("");
        if !ext.is_empty() && !name.to_lowercase().ends_with(&format!(".{}", ext.to_lowercase())) {
            name = format!("{}.{}", name, ext);
        }
        PolicyDecision::Accept(name)
    }

    fn get_destination(&mut self, ctx: &PolicyContext<'_>) -> PolicyDecision<Destination> {
        let Some(template) = self.directory.as_deref() else {
            return PolicyDecision::Decline;
        };
        if ctx.series.is_none() {
            return PolicyDecision::Decline;
        }

        // Same-cloud destinations first. Cloud rules and free space are
        // checked by the placement engine.
        let Some(target) = ctx
            .locations
            .iter()
            .filter(|l| l.is_drop_destination && !l.is_drop_source)
            .min_by_key(|l| (!l.same_cloud(ctx.location), l.id))
        else {
            return PolicyDecision::Decline;
        };

        let vars = self.engine.variables(ctx);
        let rendered = self.engine.substitute(template, &vars);
        let mut components: Vec<String> = rendered
            .split(['/', '\\'])
            .map(sanitize_component)
            .filter(|c| !c.is_empty())
            .collect();

        // A template ending in a file name only contributes its directory.
        let ext = vars.get("ext").map(String::as_str).unwrap_or("");
        if !ext.is_empty() {
            let suffix = format!(".{}", ext.to_lowercase());
            if components
                .last()
                .is_some_and(|c| c.to_lowercase().ends_with(&suffix))
            {
                components.pop();
            }
        }

        PolicyDecision::Accept(Destination {
            location_id: target.id,
            relative_dir: components.join("/"),
        })
    }
}

pub struct TemplatePolicyFactory {
    engine: VariableEngine,
    settings: TemplateConfig,
}

impl TemplatePolicyFactory {
    pub fn new(settings: &TemplateConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            engine: VariableEngine::new()?,
            settings: settings.clone(),
        })
    }
}

impl NamingPolicyFactory for TemplatePolicyFactory {
    fn id(&self) -> &str {
        TEMPLATE_POLICY_ID
    }

    fn create(&self) -> Box<dyn NamingPolicy> {
        Box::new(TemplatePolicy {
            engine: self.engine.clone(),
            filename: self.settings.filename.clone(),
            directory: self.settings.directory.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContentRecord, Episode, PlacementRecord, Series, StorageLocation};
    use std::path::PathBuf;

    fn location(id: i64, drop_source: bool, drop_destination: bool) -> StorageLocation {
        StorageLocation {
            id,
            name: format!("loc{}", id),
            root_path: PathBuf::from(format!("/loc{}", id)),
            cloud_id: None,
            is_drop_source: drop_source,
            is_drop_destination: drop_destination,
        }
    }

    fn content() -> ContentRecord {
        ContentRecord {
            id: 1,
            hash: "abc".into(),
            file_size: 10,
            duration_ms: None,
            media_info: None,
            is_ignored: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn placement(path: &str) -> PlacementRecord {
        PlacementRecord {
            id: 7,
            location_id: 1,
            relative_path: path.into(),
            content_id: 1,
        }
    }

    fn episode(number: u32, title: &str) -> Episode {
        Episode {
            id: 100,
            series_id: 10,
            number,
            title: title.into(),
            air_date: NaiveDate::from_ymd_opt(2021, 4, 9),
        }
    }

    fn policy(filename: Option<&str>, directory: Option<&str>) -> Box<dyn NamingPolicy> {
        TemplatePolicyFactory::new(&TemplateConfig {
            filename: filename.map(str::to_string),
            directory: directory.map(str::to_string),
        })
        .unwrap()
        .create()
    }

    #[test]
    fn test_substitute_builtin_variables() {
        let engine = VariableEngine::new().unwrap();
        let series = Series::new(10, "Cowboy Bebop");
        let episodes = vec![episode(5, "Ballad of Fallen Angels")];
        let p = placement("incoming/raw_05.mkv");
        let loc = location(1, true, false);
        let c = content();
        let ctx = PolicyContext {
            placement: &p,
            location: &loc,
            content: &c,
            series: Some(&series),
            episodes: &episodes,
            locations: &[],
        };

        let vars = engine.variables(&ctx);
        let result = engine.substitute("$series - $episode - $title [$original] $y-$m-$d.$ext", &vars);
        assert_eq!(
            result,
            "Cowboy Bebop - 05 - Ballad of Fallen Angels [raw_05] 2021-04-09.mkv"
        );
    }

    #[test]
    fn test_substitute_leaves_unknown_tokens() {
        let engine = VariableEngine::new().unwrap();
        let mut vars = HashMap::new();
        vars.insert("series".to_string(), "$episode".to_string());
        // Values are not expanded a second time.
        assert_eq!(engine.substitute("$series $uuid", &vars), "$episode $uuid");
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("Re:Zero?"), "Re_Zero_");
        assert_eq!(sanitize_component("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_component("  ..hidden. "), "hidden");
        assert_eq!(sanitize_component("Show - 01"), "Show - 01");
        assert_eq!(sanitize_component(""), "");
    }

    #[test]
    fn test_filename_appends_extension() {
        let series = Series::new(10, "Show");
        let episodes = vec![episode(1, "Pilot")];
        let p = placement("show.MKV");
        let loc = location(1, true, false);
        let c = content();
        let ctx = PolicyContext {
            placement: &p,
            location: &loc,
            content: &c,
            series: Some(&series),
            episodes: &episodes,
            locations: &[],
        };

        let mut policy = policy(Some("$series - $episode"), None);
        assert_eq!(
            policy.get_filename(&ctx),
            PolicyDecision::Accept("Show - 01.MKV".into())
        );

        let mut policy = TemplatePolicyFactory::new(&TemplateConfig {
            filename: Some("$series.$ext".into()),
            directory: None,
        })
        .unwrap()
        .create();
        assert_eq!(policy.get_filename(&ctx), PolicyDecision::Accept("Show.MKV".into()));
    }

    #[test]
    fn test_declines_without_series_or_template() {
        let p = placement("show.mkv");
        let loc = location(1, true, false);
        let c = content();
        let ctx = PolicyContext {
            placement: &p,
            location: &loc,
            content: &c,
            series: None,
            episodes: &[],
            locations: &[],
        };
        assert_eq!(
            policy(Some("$series"), Some("$series")).get_filename(&ctx),
            PolicyDecision::Decline
        );

        let series = Series::new(1, "Show");
        let ctx = PolicyContext {
            series: Some(&series),
            ..ctx
        };
        assert_eq!(policy(None, None).get_filename(&ctx), PolicyDecision::Decline);
        assert_eq!(policy(None, None).get_destination(&ctx), PolicyDecision::Decline);
    }

    #[test]
    fn test_destination_picks_drop_destination_and_strips_file_name() {
        let series = Series::new(10, "Show: Reloaded");
        let episodes = vec![episode(3, "Three")];
        let p = placement("show.mkv");
        let drop = location(1, true, false);
        let locations = vec![drop.clone(), location(2, false, false), location(3, false, true)];
        let c = content();
        let ctx = PolicyContext {
            placement: &p,
            location: &drop,
            content: &c,
            series: Some(&series),
            episodes: &episodes,
            locations: &locations,
        };

        let mut policy = policy(None, Some("$series/Season $y/$original.$ext"));
        assert_eq!(
            policy.get_destination(&ctx),
            PolicyDecision::Accept(Destination {
                location_id: 3,
                relative_dir: "Show_ Reloaded/Season 2021".into(),
            })
        );
    }

    #[test]
    fn test_destination_prefers_same_cloud() {
        let series = Series::new(10, "Show");
        let p = placement("show.mkv");
        let drop = location(1, true, false);
        let mut remote = location(2, false, true);
        remote.cloud_id = Some("gdrive".into());
        let c = content();
        let mut policy = policy(None, Some("$series"));

        let both = vec![drop.clone(), remote.clone(), location(4, false, true)];
        let ctx = PolicyContext {
            placement: &p,
            location: &drop,
            content: &c,
            series: Some(&series),
            episodes: &[],
            locations: &both,
        };
        match policy.get_destination(&ctx) {
            PolicyDecision::Accept(dest) => assert_eq!(dest.location_id, 4),
            other => panic!("expected a destination, got {:?}", other),
        }

        // Only a remote candidate: offered, and left to the engine to vet.
        let remote_only = vec![drop.clone(), remote];
        let ctx = PolicyContext {
            locations: &remote_only,
            ..ctx
        };
        match policy.get_destination(&ctx) {
            PolicyDecision::Accept(dest) => assert_eq!(dest.location_id, 2),
            other => panic!("expected a destination, got {:?}", other),
        }
    }
}
