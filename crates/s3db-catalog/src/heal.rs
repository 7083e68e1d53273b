//! The 5-step self-healing pipeline (spec §4.4).
//!
//! Every step is idempotent — re-running the pipeline on an already
//! healthy manifest is a no-op and appends no log entries for the steps
//! that found nothing to fix.

use crate::manifest::{Manifest, ManifestSchemaVersion, ResourceManifest};
use serde_json::{Map, Value};

/// One step's outcome, surfaced to the caller as part of the
/// `metadataHealed` event (spec §4.4).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealingLogEntry {
    pub step: String,
    pub detail: String,
}

impl HealingLogEntry {
    fn new(step: &str, detail: impl Into<String>) -> Self {
        Self { step: step.to_string(), detail: detail.into() }
    }
}

/// The healing pipeline's result: a manifest guaranteed to parse and
/// satisfy invariant 3 (every resource's `currentVersion` names an
/// existing version), the steps it took, and — only in panic mode — the
/// original corrupt body the caller should back up before overwriting.
pub struct HealOutcome {
    pub manifest: Manifest,
    pub healing_log: Vec<HealingLogEntry>,
    pub corrupted_backup: Option<String>,
}

/// Run the full pipeline over a raw `s3db.json` body.
#[must_use]
pub fn heal(raw: &str) -> HealOutcome {
    let mut log = Vec::new();

    let Some(mut value) = syntactic_repair(raw, &mut log) else {
        // Step 5: panic mode. Parsing failed even after trailing-comma
        // stripping and bracket balancing; give up on salvaging this body.
        log.push(HealingLogEntry::new("panic-mode", "manifest body is not recoverable JSON; replacing with a blank manifest"));
        return HealOutcome { manifest: Manifest::default(), healing_log: log, corrupted_backup: Some(raw.to_string()) };
    };

    structural_repair(&mut value, &mut log);
    per_resource_repair(&mut value, &mut log);
    hook_sanitation(&mut value, &mut log);

    let manifest = match serde_json::from_value::<Manifest>(value) {
        Ok(manifest) => manifest,
        Err(err) => {
            // The structural/per-resource/hook steps guarantee the shape
            // `Manifest` expects; a residual mismatch (e.g. an attribute
            // definition too malformed to coerce) still must not panic
            // the caller at connect time.
            log.push(HealingLogEntry::new("panic-mode", format!("manifest still failed to deserialize after repair: {err}")));
            return HealOutcome { manifest: Manifest::default(), healing_log: log, corrupted_backup: Some(raw.to_string()) };
        }
    };

    HealOutcome { manifest, healing_log: log, corrupted_backup: None }
}

/// Step 1: strip trailing commas, balance unclosed `{`/`[`. Returns
/// `None` if the body is still unparseable, signaling panic mode.
fn syntactic_repair(raw: &str, log: &mut Vec<HealingLogEntry>) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(raw) {
        return Some(value);
    }

    let stripped = strip_trailing_commas(raw);
    let balanced = balance_brackets(&stripped);
    match serde_json::from_str(&balanced) {
        Ok(value) => {
            log.push(HealingLogEntry::new(
                "syntactic-repair",
                "stripped trailing commas and/or balanced unclosed brackets",
            ));
            Some(value)
        }
        Err(_) => None,
    }
}

/// Remove commas that are immediately followed (ignoring whitespace) by
/// a closing `}` or `]`, without disturbing commas inside string values.
fn strip_trailing_commas(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }
        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Append whatever closing brackets are needed to balance unclosed
/// `{`/`[`, tracked outside string literals.
fn balance_brackets(raw: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in raw.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }
    let mut out = raw.to_string();
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// Step 2: ensure the four top-level keys exist, filling in defaults.
fn structural_repair(value: &mut Value, log: &mut Vec<HealingLogEntry>) {
    let Some(obj) = value.as_object_mut() else {
        *value = serde_json::to_value(Manifest::default()).expect("default manifest serializes");
        log.push(HealingLogEntry::new("structural-repair", "manifest body was not a JSON object; replaced with defaults"));
        return;
    };

    let mut fixed = Vec::new();
    if !matches!(obj.get("version"), Some(Value::String(_))) {
        obj.insert("version".to_string(), Value::String(crate::manifest::MANIFEST_VERSION.to_string()));
        fixed.push("version");
    }
    if !matches!(obj.get("s3dbVersion"), Some(Value::String(_))) {
        obj.insert("s3dbVersion".to_string(), Value::String(env!("CARGO_PKG_VERSION").to_string()));
        fixed.push("s3dbVersion");
    }
    if !matches!(obj.get("lastUpdated"), Some(Value::String(_))) {
        obj.insert("lastUpdated".to_string(), Value::String(chrono::Utc::now().to_rfc3339()));
        fixed.push("lastUpdated");
    }
    if !matches!(obj.get("resources"), Some(Value::Object(_))) {
        obj.insert("resources".to_string(), Value::Object(Map::new()));
        fixed.push("resources");
    }

    if !fixed.is_empty() {
        log.push(HealingLogEntry::new("structural-repair", format!("filled missing top-level keys: {}", fixed.join(", "))));
    }
}

/// Step 3: ensure every resource's `versions` is an object and
/// `currentVersion` names a version that exists within it (invariant 3).
fn per_resource_repair(value: &mut Value, log: &mut Vec<HealingLogEntry>) {
    let Some(resources) = value.get_mut("resources").and_then(Value::as_object_mut) else { return };

    for (name, entry) in resources.iter_mut() {
        let Some(obj) = entry.as_object_mut() else {
            *entry = serde_json::to_value(ResourceManifest::default()).expect("default resource manifest serializes");
            log.push(HealingLogEntry::new("per-resource-repair", format!("resource {name:?} entry was not an object; replaced with defaults")));
            continue;
        };

        if !matches!(obj.get("versions"), Some(Value::Object(_))) {
            obj.insert("versions".to_string(), Value::Object(Map::new()));
            log.push(HealingLogEntry::new("per-resource-repair", format!("resource {name:?} had no valid versions object")));
        }

        let versions = obj.get("versions").and_then(Value::as_object).cloned().unwrap_or_default();
        let current_is_valid = obj
            .get("currentVersion")
            .and_then(Value::as_str)
            .is_some_and(|v| versions.contains_key(v));

        if !current_is_valid {
            if let Some(latest) = latest_version_key(&versions) {
                obj.insert("currentVersion".to_string(), Value::String(latest.clone()));
                log.push(HealingLogEntry::new(
                    "per-resource-repair",
                    format!("resource {name:?} currentVersion repointed to latest version {latest:?}"),
                ));
            } else {
                // No versions at all: synthesize an empty v1 so invariant 3
                // still holds for an otherwise-empty resource entry.
                let mut empty_version = Map::new();
                empty_version.insert("hash".to_string(), Value::String(String::new()));
                empty_version.insert("attributes".to_string(), Value::Array(Vec::new()));
                obj.entry("versions").or_insert_with(|| Value::Object(Map::new()));
                if let Some(v) = obj.get_mut("versions").and_then(Value::as_object_mut) {
                    v.insert("v1".to_string(), Value::Object(empty_version));
                }
                obj.insert("currentVersion".to_string(), Value::String("v1".to_string()));
                log.push(HealingLogEntry::new(
                    "per-resource-repair",
                    format!("resource {name:?} had no versions; synthesized an empty v1"),
                ));
            }
        }
    }
}

/// Pick the lexicographically/numerically latest `vN` key. Falls back to
/// plain lexicographic order for non-`vN`-shaped keys so a caller-chosen
/// version id scheme is not clobbered.
fn latest_version_key(versions: &Map<String, Value>) -> Option<String> {
    versions
        .keys()
        .max_by_key(|k| {
            k.strip_prefix('v')
                .and_then(|n| n.parse::<u64>().ok())
                .map_or((0u64, k.to_string()), |n| (n, k.to_string()))
        })
        .cloned()
}

/// Step 4: drop hook-array entries that aren't valid `{name, config?}`
/// function-registry references; coerce a hooks value mistyped as a
/// scalar into an empty array.
fn hook_sanitation(value: &mut Value, log: &mut Vec<HealingLogEntry>) {
    let Some(resources) = value.get_mut("resources").and_then(Value::as_object_mut) else { return };

    for (rname, entry) in resources.iter_mut() {
        let Some(versions) = entry.get_mut("versions").and_then(Value::as_object_mut) else { continue };
        for (vname, version) in versions.iter_mut() {
            let Some(vobj) = version.as_object_mut() else { continue };
            let Some(hooks) = vobj.get_mut("hooks") else { continue };

            let Some(hooks_obj) = hooks.as_object_mut() else {
                *hooks = Value::Object(Map::new());
                log.push(HealingLogEntry::new(
                    "hook-sanitation",
                    format!("{rname}/{vname}: hooks value was not an object; reset to empty"),
                ));
                continue;
            };

            for (point, arr) in hooks_obj.iter_mut() {
                let Some(entries) = arr.as_array() else {
                    *arr = Value::Array(Vec::new());
                    log.push(HealingLogEntry::new(
                        "hook-sanitation",
                        format!("{rname}/{vname}/{point}: hook array mistyped as a scalar; reset to []"),
                    ));
                    continue;
                };

                let before = entries.len();
                let cleaned: Vec<Value> = entries
                    .iter()
                    .filter(|e| e.get("name").and_then(Value::as_str).is_some())
                    .cloned()
                    .collect();
                if cleaned.len() != before {
                    log.push(HealingLogEntry::new(
                        "hook-sanitation",
                        format!("{rname}/{vname}/{point}: dropped {} invalid hook entries", before - cleaned.len()),
                    ));
                }
                *arr = Value::Array(cleaned);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestSchemaVersion;

    #[test]
    fn healthy_manifest_is_a_no_op() {
        let mut manifest = Manifest::default();
        let mut resource = ResourceManifest { current_version: "v1".to_string(), ..Default::default() };
        resource.versions.insert("v1".to_string(), ManifestSchemaVersion { hash: "h".into(), ..Default::default() });
        manifest.upsert_resource("users", resource);
        let raw = serde_json::to_string(&manifest).unwrap();

        let outcome = heal(&raw);
        assert!(outcome.healing_log.is_empty());
        assert_eq!(outcome.manifest.resources.get("users").unwrap().current_version, "v1");
    }

    #[test]
    fn trailing_comma_is_stripped() {
        let raw = r#"{"version":"1","s3dbVersion":"0.1","lastUpdated":"x","resources":{"u":{"currentVersion":"v1","versions":{"v1":{"hash":"h","attributes":{"n":"string"},}}}}}"#;
        // the attributes map itself is malformed (object instead of array) but
        // this test targets only the trailing comma before the closing `}`.
        let outcome = heal(raw);
        assert!(outcome.healing_log.iter().any(|e| e.step == "syntactic-repair"));
    }

    #[test]
    fn unclosed_braces_are_balanced() {
        let raw = r#"{"version":"1","resources":{"u":{"currentVersion":"v1","versions":{"v1":{"hash":"h","attributes":[]"#;
        let outcome = heal(raw);
        assert!(outcome.corrupted_backup.is_none());
        assert!(outcome.healing_log.iter().any(|e| e.step == "syntactic-repair"));
    }

    #[test]
    fn current_version_repoints_to_latest_when_missing() {
        let raw = r#"{"version":"1","s3dbVersion":"0.1","lastUpdated":"x","resources":{"u":{"currentVersion":"v9","versions":{"v1":{"hash":"h","attributes":[]},"v2":{"hash":"h2","attributes":[]}}}}}"#;
        let outcome = heal(raw);
        assert_eq!(outcome.manifest.resources.get("u").unwrap().current_version, "v2");
        assert!(outcome.healing_log.iter().any(|e| e.step == "per-resource-repair"));
    }

    #[test]
    fn non_json_body_triggers_panic_mode() {
        let outcome = heal("not json at all {{{ ???");
        assert!(outcome.corrupted_backup.is_some());
        assert!(outcome.healing_log.iter().any(|e| e.step == "panic-mode"));
        assert!(outcome.manifest.resources.is_empty());
    }

    #[test]
    fn hook_array_with_invalid_entries_is_cleaned() {
        let raw = r#"{"version":"1","s3dbVersion":"0.1","lastUpdated":"x","resources":{"u":{"currentVersion":"v1","versions":{"v1":{"hash":"h","attributes":[],"hooks":{"beforeInsert":[{"name":"validate"},42,"oops"]}}}}}}"#;
        let outcome = heal(raw);
        let hooks = &outcome.manifest.resources["u"].versions["v1"].hooks;
        assert_eq!(hooks["beforeInsert"].len(), 1);
        assert_eq!(hooks["beforeInsert"][0].name, "validate");
    }

    #[test]
    fn missing_top_level_keys_are_filled() {
        let raw = r#"{"resources":{}}"#;
        let outcome = heal(raw);
        assert_eq!(outcome.manifest.version, crate::manifest::MANIFEST_VERSION);
        assert!(outcome.healing_log.iter().any(|e| e.step == "structural-repair"));
    }

    #[test]
    fn reheal_is_idempotent() {
        let raw = r#"{"version":"1","resources":{"u":{"currentVersion":"v9","versions":{"v1":{"hash":"h","attributes":[]}}}}}"#;
        let first = heal(raw);
        let healed_raw = serde_json::to_string(&first.manifest).unwrap();
        let second = heal(&healed_raw);
        assert!(second.healing_log.is_empty());
        assert_eq!(second.manifest, first.manifest);
    }
}
