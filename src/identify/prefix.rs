use regex::Regex;

use super::recognizers::normalize_path;
use super::types::Dialect;

/// File-level route prefixes that a line-level recognizer cannot see:
/// FastAPI `APIRouter(prefix=...)`, Flask `Blueprint(url_prefix=...)`,
/// NestJS `@Controller('...')` and Spring class-level `@RequestMapping`.
pub struct PrefixRules {
    fastapi: Regex,
    blueprint: Regex,
    nest_controller: Regex,
    spring_class: Regex,
}

impl PrefixRules {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            fastapi: Regex::new(r#"APIRouter\([^)]*prefix\s*=\s*['"]([^'"]+)['"]"#)?,
            blueprint: Regex::new(r#"Blueprint\([^)]*url_prefix\s*=\s*['"]([^'"]+)['"]"#)?,
            nest_controller: Regex::new(r#"@Controller\(\s*['"`]([^'"`]+)['"`]"#)?,
            spring_class: Regex::new(
                r#"@RequestMapping\(\s*(?:(?:value|path)\s*=\s*)?\{?\s*"([^"]+)""#,
            )?,
        })
    }

    /// Prefix declared in `source` for routes of `dialect`, if any.
    pub fn prefix_for(&self, dialect: Dialect, source: &str) -> Option<String> {
        let caps = match dialect {
            Dialect::FastApi => self.fastapi.captures(source),
            Dialect::Flask => self.blueprint.captures(source),
            Dialect::NestJs => self.nest_controller.captures(source),
            Dialect::Spring => {
                // Only a mapping placed before the class declaration is a prefix.
                let class_at = source.find("class ")?;
                self.spring_class
                    .captures(&source[..class_at])
            }
            _ => None,
        }?;
        let prefix = normalize_path(caps.get(1)?.as_str());
        (prefix != "/").then_some(prefix)
    }
}

/// `/users` + `/{id}` -> `/users/{id}`; paths already under the prefix are
/// left alone.
pub fn apply_prefix(prefix: &str, path: &str) -> String {
    if path == prefix || path.starts_with(&format!("{}/", prefix)) {
        return path.to_string();
    }
    let tail = path.trim_matches('/');
    if tail.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", prefix, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fastapi_prefix() {
        let rules = PrefixRules::new().unwrap();
        let source = "router = APIRouter(prefix=\"/tabs\", tags=[\"tabs\"])\n";
        assert_eq!(rules.prefix_for(Dialect::FastApi, source).as_deref(), Some("/tabs"));
        assert_eq!(rules.prefix_for(Dialect::Flask, source), None);
    }

    #[test]
    fn test_spring_prefix_only_before_class() {
        let rules = PrefixRules::new().unwrap();
        let class_level = "@RestController\n@RequestMapping(\"/api/accounts\")\npublic class AccountController {\n";
        assert_eq!(
            rules.prefix_for(Dialect::Spring, class_level).as_deref(),
            Some("/api/accounts")
        );
        let method_level = "public class C {\n  @RequestMapping(\"/x\")\n  void x() {}\n}";
        assert_eq!(rules.prefix_for(Dialect::Spring, method_level), None);
    }

    #[test]
    fn test_apply_prefix() {
        assert_eq!(apply_prefix("/tabs", "/{tab_id}"), "/tabs/{tab_id}");
        assert_eq!(apply_prefix("/tabs", "/"), "/tabs");
        assert_eq!(apply_prefix("/tabs", "/tabs/1"), "/tabs/1");
    }
}
