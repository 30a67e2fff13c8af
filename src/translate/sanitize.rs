//! Removal of fields a backend rejects
//!
//! Works on the raw JSON tree so it does not matter under which top-level
//! field a caller placed the annotation.

use serde_json::Value;

use crate::config::SanitizeRules;

/// Strip denied keys at any depth, plus wrapper objects that held or sat
/// next to one. Returns the number of keys removed; zero means `value` is
/// untouched.
pub fn sanitize(value: &mut Value, rules: &SanitizeRules) -> usize {
    if rules.keys.is_empty() {
        return 0;
    }
    walk(value, rules).removed
}

struct Walk {
    removed: usize,
    found_denied: bool,
}

fn walk(value: &mut Value, rules: &SanitizeRules) -> Walk {
    match value {
        Value::Object(obj) => {
            let mut removed = 0;
            for key in &rules.keys {
                if obj.remove(key).is_some() {
                    removed += 1;
                }
            }
            let direct = removed > 0;

            let mut found_below = false;
            let mut tainted_wrappers = Vec::new();
            for (key, child) in obj.iter_mut() {
                let inner = walk(child, rules);
                removed += inner.removed;
                if inner.found_denied {
                    found_below = true;
                    if rules.wrappers.contains(key) {
                        tainted_wrappers.push(key.clone());
                    }
                }
            }

            if direct {
                // A denied key takes its sibling wrappers with it.
                for wrapper in &rules.wrappers {
                    if obj.remove(wrapper).is_some() {
                        removed += 1;
                    }
                }
            } else {
                for wrapper in tainted_wrappers {
                    if obj.remove(&wrapper).is_some() {
                        removed += 1;
                    }
                }
            }

            Walk {
                removed,
                found_denied: direct || found_below,
            }
        }
        Value::Array(items) => items.iter_mut().fold(
            Walk {
                removed: 0,
                found_denied: false,
            },
            |acc, item| {
                let inner = walk(item, rules);
                Walk {
                    removed: acc.removed + inner.removed,
                    found_denied: acc.found_denied || inner.found_denied,
                }
            },
        ),
        _ => Walk {
            removed: 0,
            found_denied: false,
        },
    }
}
