use regex::{Captures, Regex};

use super::types::{Confidence, Dialect, HttpMethod, Identity, InterfaceKind};

/// What a recognizer read off a single line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recognition {
    pub kind: InterfaceKind,
    pub identity: Identity,
    pub confidence: Confidence,
    /// The route or name exactly as written at the declaration.
    pub literal: String,
}

/// Turns a pattern match (plus the lines that follow it) into recognitions.
/// One declaration can name several interfaces, e.g. a route listing methods.
pub type Extract = fn(&Captures<'_>, &[&str]) -> Vec<Recognition>;

/// One line-level pattern for one dialect. Pure: the same line and trailing
/// window always produce the same answer.
pub struct Recognizer {
    name: &'static str,
    dialect: Dialect,
    pattern: Regex,
    extract: Extract,
}

impl Recognizer {
    pub fn new(
        name: &'static str,
        dialect: Dialect,
        pattern: &str,
        extract: Extract,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            dialect,
            pattern: Regex::new(pattern)?,
            extract,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// `trailing` holds the next few lines on the same side of the diff, for
    /// recognizers that pair an annotation with the line below it.
    pub fn recognize(&self, line: &str, trailing: &[&str]) -> Vec<Recognition> {
        match self.pattern.captures(line) {
            Some(caps) => (self.extract)(&caps, trailing),
            None => Vec::new(),
        }
    }
}

/// The built-in recognizers in tie-break order: framework-specific patterns
/// first, the generic `/api/...` literal last.
pub fn builtin() -> Result<Vec<Recognizer>, regex::Error> {
    Ok(vec![
        Recognizer::new(
            "express-route",
            Dialect::Express,
            r#"\b(?:router|app|api|server|routes)\.(get|post|put|patch|delete|head|options)\s*\(\s*['"`]([^'"`]+)['"`]"#,
            method_then_path,
        )?,
        Recognizer::new(
            "nestjs-handler",
            Dialect::NestJs,
            r#"@(Get|Post|Put|Patch|Delete|Head|Options)\(\s*(?:['"`]([^'"`]*)['"`])?\s*\)"#,
            method_then_path,
        )?,
        Recognizer::new(
            "fastapi-decorator",
            Dialect::FastApi,
            r#"@\w+\.(get|post|put|patch|delete|head|options)\(\s*['"]([^'"]*)['"]"#,
            method_then_path,
        )?,
        Recognizer::new(
            "flask-route",
            Dialect::Flask,
            r#"@\w+\.route\(\s*['"]([^'"]+)['"](?:[^)]*methods\s*=\s*[\[(]([^\])]*)[\])])?"#,
            flask_route,
        )?,
        Recognizer::new(
            "django-path",
            Dialect::Django,
            r#"\b(?:re_)?path\(\s*r?['"]\^?([^'"$]*)\$?['"]\s*,"#,
            django_path,
        )?,
        Recognizer::new(
            "actix-attribute",
            Dialect::Actix,
            r#"#\[(get|post|put|patch|delete|head|options)\(\s*"([^"]+)""#,
            method_then_path,
        )?,
        Recognizer::new(
            "axum-route",
            Dialect::Axum,
            r#"\.route\(\s*"([^"]+)"\s*,\s*(?:[\w:]+::)?(get|post|put|patch|delete|head|options)\s*\("#,
            path_then_method,
        )?,
        Recognizer::new(
            "spring-mapping",
            Dialect::Spring,
            r#"@(Get|Post|Put|Patch|Delete)Mapping\(\s*(?:(?:value|path)\s*=\s*)?\{?\s*"([^"]*)""#,
            method_then_path,
        )?,
        Recognizer::new(
            "jaxrs-method",
            Dialect::JaxRs,
            r#"@(GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS)\b(?:\s+@Path\(\s*"([^"]+)"\s*\))?"#,
            jaxrs_method,
        )?,
        Recognizer::new(
            "gin-route",
            Dialect::Gin,
            r#"\b\w+\.(GET|POST|PUT|PATCH|DELETE|HEAD|OPTIONS|Get|Post|Put|Patch|Delete|Head|Options)\(\s*"(/[^"]*)""#,
            method_then_path,
        )?,
        Recognizer::new(
            "react-function-component",
            Dialect::React,
            r#"^\s*(?:export\s+(?:default\s+)?)?function\s+([A-Z][A-Za-z0-9]*)\s*\("#,
            react_component,
        )?,
        Recognizer::new(
            "react-arrow-component",
            Dialect::React,
            r#"^\s*(?:export\s+)?const\s+([A-Z][A-Za-z0-9]*)\s*(:\s*(?:React\.)?FC\b[^=]*)?=\s*(?:React\.memo\(\s*)?(?:\([^)]*\)|\w+)\s*=>"#,
            react_component,
        )?,
        Recognizer::new(
            "angular-component",
            Dialect::Angular,
            r#"@Component\(\s*\{?\s*(?:selector\s*:\s*['"]([^'"]+)['"])?"#,
            angular_component,
        )?,
        Recognizer::new(
            "api-path-literal",
            Dialect::Generic,
            r#"['"`](/api/[^'"`\s?#]+)['"`]"#,
            api_literal,
        )?,
    ])
}

/// Normalize a route path: leading slash, no trailing slash except root.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("/{}", trimmed)
}

/// `literal` is the path as written; an empty one falls back to the whole
/// matched declaration so there is still something to search for.
fn endpoint(caps: &Captures<'_>, method: &str, path: &str) -> Option<Recognition> {
    let literal = if path.trim().is_empty() {
        caps.get(0)?.as_str().trim().to_string()
    } else {
        path.to_string()
    };
    Some(Recognition {
        kind: InterfaceKind::Endpoint,
        identity: Identity::endpoint(Some(HttpMethod::parse(method)?), normalize_path(path)),
        confidence: Confidence::High,
        literal,
    })
}

fn method_then_path(caps: &Captures<'_>, _trailing: &[&str]) -> Vec<Recognition> {
    let path = caps.get(2).map_or("", |m| m.as_str());
    caps.get(1)
        .and_then(|method| endpoint(caps, method.as_str(), path))
        .into_iter()
        .collect()
}

fn path_then_method(caps: &Captures<'_>, _trailing: &[&str]) -> Vec<Recognition> {
    match (caps.get(1), caps.get(2)) {
        (Some(path), Some(method)) => endpoint(caps, method.as_str(), path.as_str()).into_iter().collect(),
        _ => Vec::new(),
    }
}

/// One recognition per listed method; no `methods=` means GET.
fn flask_route(caps: &Captures<'_>, _trailing: &[&str]) -> Vec<Recognition> {
    let Some(path) = caps.get(1) else {
        return Vec::new();
    };
    let listed: Vec<&str> = caps.get(2).map_or_else(Vec::new, |m| {
        m.as_str()
            .split(',')
            .map(|token| token.trim().trim_matches(|c: char| c == '\'' || c == '"'))
            .filter(|token| !token.is_empty())
            .collect()
    });
    let methods = if listed.is_empty() { vec!["GET"] } else { listed };
    let mut recognitions: Vec<Recognition> = Vec::new();
    for method in methods {
        if let Some(recognition) = endpoint(caps, method, path.as_str()) {
            if !recognitions.iter().any(|r| r.identity == recognition.identity) {
                recognitions.push(recognition);
            }
        }
    }
    recognitions
}

fn django_path(caps: &Captures<'_>, _trailing: &[&str]) -> Vec<Recognition> {
    // Django routes do not carry a method; GET is the conventional check.
    let Some(path) = caps.get(1) else {
        return Vec::new();
    };
    endpoint(caps, "GET", path.as_str())
        .map(|recognition| Recognition {
            confidence: Confidence::Medium,
            ..recognition
        })
        .into_iter()
        .collect()
}

fn jaxrs_method(caps: &Captures<'_>, trailing: &[&str]) -> Vec<Recognition> {
    let Some(method) = caps.get(1).map(|m| m.as_str()) else {
        return Vec::new();
    };
    let recognition = match caps.get(2) {
        Some(path) => endpoint(caps, method, path.as_str()),
        None => trailing.iter().find_map(|line| {
            let start = line.find("@Path(\"")? + "@Path(\"".len();
            let end = line[start..].find('"')? + start;
            endpoint(caps, method, &line[start..end])
        }),
    };
    recognition.into_iter().collect()
}

fn renders_markup(text: &str) -> bool {
    text.contains("</")
        || text.contains("/>")
        || text.contains("<>")
        || text
            .split('<')
            .skip(1)
            .any(|rest| rest.starts_with(|c: char| c.is_ascii_lowercase()))
}

fn component(name: &str, confidence: Confidence) -> Recognition {
    Recognition {
        kind: InterfaceKind::Component,
        identity: Identity::component(name),
        confidence,
        literal: name.to_string(),
    }
}

fn react_component(caps: &Captures<'_>, trailing: &[&str]) -> Vec<Recognition> {
    let typed_fc = caps.get(2).is_some();
    let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
        return Vec::new();
    };
    if !typed_fc && !renders_markup(whole.as_str()) && !trailing.iter().any(|l| renders_markup(l)) {
        return Vec::new();
    }
    let confidence = if typed_fc {
        Confidence::High
    } else {
        Confidence::Medium
    };
    vec![component(name.as_str(), confidence)]
}

fn angular_component(caps: &Captures<'_>, trailing: &[&str]) -> Vec<Recognition> {
    let selector = caps.get(1).map(|m| m.as_str().to_string()).or_else(|| {
        trailing.iter().find_map(|line| {
            let rest = line.trim_start().strip_prefix("selector")?;
            let rest = rest.trim_start().strip_prefix(':')?.trim_start();
            let quote = rest.chars().next().filter(|c| *c == '\'' || *c == '"')?;
            let end = rest[1..].find(quote)?;
            Some(rest[1..1 + end].to_string())
        })
    });
    selector
        .map(|selector| component(&selector, Confidence::High))
        .into_iter()
        .collect()
}

fn api_literal(caps: &Captures<'_>, _trailing: &[&str]) -> Vec<Recognition> {
    let Some(path) = caps.get(1) else {
        return Vec::new();
    };
    vec![Recognition {
        kind: InterfaceKind::Endpoint,
        identity: Identity::endpoint(None, normalize_path(path.as_str())),
        confidence: Confidence::Low,
        literal: path.as_str().to_string(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Language;

    fn first_match(line: &str, trailing: &[&str], language: Language) -> Option<(Dialect, Recognition)> {
        builtin()
            .unwrap()
            .into_iter()
            .filter(|r| r.dialect().family().covers(language))
            .find_map(|r| r.recognize(line, trailing).into_iter().next().map(|m| (r.dialect(), m)))
    }

    fn expect_endpoint(line: &str, language: Language, dialect: Dialect, expected: &str) {
        let (found, recognition) =
            first_match(line, &[], language).expect("line should be recognized");
        assert_eq!(found, dialect, "{}", line);
        assert_eq!(recognition.kind, InterfaceKind::Endpoint);
        assert_eq!(recognition.identity.to_string(), expected);
    }

    #[test]
    fn test_backend_dialects() {
        use Language::*;
        expect_endpoint("router.post('/api/users', createUser);", TypeScript, Dialect::Express, "POST /api/users");
        expect_endpoint("  @Get(':id')", TypeScript, Dialect::NestJs, "GET /:id");
        expect_endpoint(
            "@router.delete(\"/items/{item_id}\")",
            Python,
            Dialect::FastApi,
            "DELETE /items/{item_id}",
        );
        expect_endpoint("@app.route('/login', methods=['POST'])", Python, Dialect::Flask, "POST /login");
        expect_endpoint("@bp.route('/health')", Python, Dialect::Flask, "GET /health");
        expect_endpoint(
            "    path('users/<int:pk>/', views.detail),",
            Python,
            Dialect::Django,
            "GET /users/<int:pk>",
        );
        expect_endpoint("#[post(\"/orders\")]", Rust, Dialect::Actix, "POST /orders");
        expect_endpoint(
            "        .route(\"/orders/:id\", get(show_order))",
            Rust,
            Dialect::Axum,
            "GET /orders/:id",
        );
        expect_endpoint("    @PostMapping(value = \"/accounts\")", Java, Dialect::Spring, "POST /accounts");
        expect_endpoint("r.GET(\"/ping\", handler)", Go, Dialect::Gin, "GET /ping");
    }

    #[test]
    fn test_jaxrs_pairs_with_trailing_path() {
        let (dialect, recognition) =
            first_match("    @DELETE", &["    @Path(\"/users/{id}\")", "    public void remove()"], Language::Java)
                .unwrap();
        assert_eq!(dialect, Dialect::JaxRs);
        assert_eq!(recognition.identity.to_string(), "DELETE /users/{id}");
        assert!(first_match("    @DELETE", &["    public void remove()"], Language::Java).is_none());
    }

    #[test]
    fn test_react_component_needs_markup() {
        let (dialect, recognition) =
            first_match(
            "export function UserCard({ user }) {",
            &["  return <div>{user.name}</div>;"],
            Language::TypeScript,
        )
        .unwrap();
        assert_eq!(dialect, Dialect::React);
        assert_eq!(recognition.identity.name, "UserCard");
        assert!(first_match(
            "export function Parser(input) {",
            &["  return input.trim();"],
            Language::TypeScript
        )
        .is_none());

        let (_, typed) = first_match("export const Avatar: React.FC<Props> = (props) => {", &[], Language::TypeScript)
                .unwrap();
        assert_eq!(typed.kind, InterfaceKind::Component);
        assert_eq!(typed.confidence, Confidence::High);
    }

    #[test]
    fn test_angular_selector_from_trailing_window() {
        let (_, recognition) =
            first_match(
            "@Component({",
            &["  selector: 'app-user-card',", "  templateUrl: './x.html'"],
            Language::TypeScript,
        )
        .unwrap();
        assert_eq!(recognition.identity.name, "app-user-card");
    }

    #[test]
    fn test_generic_literal_is_low_confidence() {
        let (dialect, recognition) = first_match("  const url = \"/api/v2/reports\";", &[], Language::TypeScript).unwrap();
        assert_eq!(dialect, Dialect::Generic);
        assert_eq!(recognition.identity.method, None);
        assert_eq!(recognition.confidence, Confidence::Low);
    }

    #[test]
    fn test_flask_route_lists_every_method() {
        let recognizer = builtin()
            .unwrap()
            .into_iter()
            .find(|r| r.name() == "flask-route")
            .unwrap();
        let identities: Vec<String> = recognizer
            .recognize("@app.route('/x', methods=['GET', \"POST\"])", &[])
            .iter()
            .map(|r| r.identity.to_string())
            .collect();
        assert_eq!(identities, vec!["GET /x", "POST /x"]);
        assert_eq!(recognizer.recognize("@bp.route('/health')", &[]).len(), 1);
    }

    #[test]
    fn test_literal_keeps_the_declared_spelling() {
        let literal = |line: &str, language| first_match(line, &[], language).unwrap().1.literal;
        assert_eq!(literal("    path('users/<int:pk>/', views.detail),", Language::Python), "users/<int:pk>/");
        assert_eq!(literal("  @Get(':id')", Language::TypeScript), ":id");
        assert_eq!(literal("  @Get()", Language::TypeScript), "@Get()");
        assert_eq!(literal("@router.post(\"/generate\")", Language::Python), "/generate");
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("users/"), "/users");
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("/api/users"), "/api/users");
    }
}
