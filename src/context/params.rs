use regex::Regex;
use std::collections::{HashMap, HashSet};

use super::types::{ParamLocation, ParameterSpec, TypeSketch, ValueType};
use crate::identify::types::Family;
use crate::identify::{Dialect, InterfaceDescriptor, InterfaceKind};

/// How deep model references are expanded into nested specs.
const MAX_MODEL_DEPTH: usize = 3;

/// Handler-local names that are framework plumbing, not request inputs.
const PY_SKIPPED_ARGS: &[&str] = &[
    "self", "cls", "request", "req", "db", "session", "response", "background_tasks", "current_user",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum TypeRef {
    Scalar(ValueType),
    Optional(Box<TypeRef>),
    List(Box<TypeRef>),
    Named(String),
}

/// A field of a class, struct or interface found in the source file.
#[derive(Debug, Clone)]
struct Field {
    name: String,
    raw_type: String,
    optional: bool,
}

type Models = HashMap<String, Vec<Field>>;

/// Parameters and response shape read off a handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inference {
    pub parameters: Vec<ParameterSpec>,
    pub response_shape: Option<TypeSketch>,
}

/// Specs in discovery order. Weak entries (untyped path placeholders) are
/// replaced by a later typed entry of the same name and location.
#[derive(Default)]
struct Collector {
    specs: Vec<ParameterSpec>,
    weak: HashSet<(String, ParamLocation)>,
}

impl Collector {
    fn weak(&mut self, spec: ParameterSpec) {
        let key = (spec.name.clone(), spec.location);
        if self.position(&key).is_none() {
            self.weak.insert(key);
            self.specs.push(spec);
        }
    }

    fn strong(&mut self, spec: ParameterSpec) {
        let key = (spec.name.clone(), spec.location);
        match self.position(&key) {
            Some(i) if self.weak.remove(&key) || self.specs[i].value_type == ValueType::Unknown => {
                self.specs[i] = spec;
            }
            Some(_) => {}
            None => self.specs.push(spec),
        }
    }

    fn position(&self, key: &(String, ParamLocation)) -> Option<usize> {
        self.specs
            .iter()
            .position(|s| s.name == key.0 && s.location == key.1)
    }

    fn contains(&self, name: &str, location: ParamLocation) -> bool {
        self.specs.iter().any(|s| s.name == name && s.location == location)
    }
}

/// Pattern-based reader of handler signatures across the supported dialects.
pub struct ParamInference {
    placeholder: Regex,
    py_class: Regex,
    py_field: Regex,
    py_response_model: Regex,
    py_return: Regex,
    flask_access: Regex,
    flask_alias: Regex,
    brace_model: Regex,
    ts_field: Regex,
    rust_field: Regex,
    java_field: Regex,
    java_record: Regex,
    go_struct: Regex,
    go_field: Regex,
    express_access: Regex,
    express_destructure: Regex,
    express_cast: Regex,
    nest_param: Regex,
    rust_extractor: Regex,
    spring_param: Regex,
    jaxrs_param: Regex,
    gin_access: Regex,
    gin_bind: Regex,
}

impl ParamInference {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            placeholder: Regex::new(r"(?::(\w+))|(?:\{(\w+)(?::(\w+))?\})|(?:<(?:(\w+):)?(\w+)>)")?,
            py_class: Regex::new(r"^(\s*)class\s+(\w+)\s*(?:\([^)]*\))?\s*:")?,
            py_field: Regex::new(r"^(\w+)\s*:\s*([^=#]+?)\s*(?:=\s*(.+?))?\s*(?:#.*)?$")?,
            py_response_model: Regex::new(r"response_model\s*=\s*([\w\[\]]+)")?,
            py_return: Regex::new(r"\)\s*->\s*([\w\[\]., |]+?)\s*:")?,
            flask_access: Regex::new(
                r#"request\.(json|form|args|headers|values|get_json\(\))\s*(\.get\(|\[)\s*['"]([\w-]+)['"]"#,
            )?,
            flask_alias: Regex::new(r"(\w+)\s*=\s*request\.(?:get_json\(\)|json)")?,
            brace_model: Regex::new(
                r"^\s*(?:export\s+)?(?:default\s+)?(?:(?:public|abstract|final|pub(?:\([^)]*\))?)\s+)*(?:interface|class|struct|type)\s+(\w+)[^{;(]*\{",
            )?,
            ts_field: Regex::new(
                r"^\s*(?:(?:readonly|public|private|protected)\s+)*(\w+)(\?)?\s*!?\s*:\s*([^;=]+?)\s*(?:=.*?)?[;,]?\s*$",
            )?,
            rust_field: Regex::new(r"^\s*(?:pub(?:\([^)]*\))?\s+)?(\w+)\s*:\s*(.+?),?\s*$")?,
            java_field: Regex::new(
                r"^\s*(?:(?:private|protected|public)\s+)(?:final\s+)?([\w<>,.?\[\] ]+?)\s+(\w+)\s*(?:=[^;]*)?;",
            )?,
            java_record: Regex::new(r"\brecord\s+(\w+)\s*\(([^)]*)\)")?,
            go_struct: Regex::new(r"^\s*type\s+(\w+)\s+struct\s*\{")?,
            go_field: Regex::new(r"^\s*([A-Z]\w*)\s+([\w\[\]*.{}]+)(?:\s+`([^`]*)`)?")?,
            express_access: Regex::new(
                r#"\breq\.(body|query|params|headers)(?:\.(\w+)|\[\s*['"]([\w-]+)['"]\s*\])"#,
            )?,
            express_destructure: Regex::new(
                r"(?:const|let|var)\s*\{([^}]*)\}\s*=\s*req\.(body|query|params)\b",
            )?,
            express_cast: Regex::new(r"req\.body\s+as\s+(\w+)")?,
            nest_param: Regex::new(
                r#"@(Body|Query|Param|Headers)\(\s*(?:['"]([\w-]+)['"])?\s*\)\s*(\w+)\s*(\?)?\s*:\s*([\w<>\[\]|.]+)"#,
            )?,
            rust_extractor: Regex::new(
                r"\b(?:Path|Query|Json|Form)\b(?:\s*\([^:]*\))?\s*:\s*(?:\w+::)*(Path|Query|Json|Form)\s*<",
            )?,
            spring_param: Regex::new(
                r"@(PathVariable|RequestParam|RequestBody|RequestHeader)(?:\(([^)]*)\))?\s+(?:@\w+\s+)*(?:final\s+)?([\w.?\[\]]+(?:<[^>]*>)?)\s+(\w+)",
            )?,
            jaxrs_param: Regex::new(
                r#"@(PathParam|QueryParam|HeaderParam|FormParam)\(\s*"([^"]+)"\s*\)\s+(?:final\s+)?([\w<>.]+)\s+\w+"#,
            )?,
            gin_access: Regex::new(
                r#"\bc\.(Param|Query|DefaultQuery|GetHeader|PostForm|DefaultPostForm)\(\s*"([^"]+)""#,
            )?,
            gin_bind: Regex::new(r"\.(?:ShouldBind(?:JSON)?|BindJSON|Bind)\(\s*&(\w+)\s*\)")?,
        })
    }

    /// Infer inputs and response shape. `handler` is the excerpt around the
    /// declaration; `file` is the whole source file, used to resolve models.
    pub fn infer(&self, descriptor: &InterfaceDescriptor, handler: &str, file: &str) -> Inference {
        if descriptor.kind != InterfaceKind::Endpoint {
            return Inference::default();
        }
        let family = descriptor.dialect.family();
        let models = self.models(family, file);
        let mut collector = Collector::default();
        let path_names = self.path_placeholders(&descriptor.identity.name, &mut collector);

        let response_shape = match descriptor.dialect {
            Dialect::FastApi | Dialect::Flask | Dialect::Django => {
                self.python(descriptor.dialect, handler, &path_names, &models, &mut collector)
            }
            Dialect::Express | Dialect::NestJs => self.typescript(handler, &models, &mut collector),
            Dialect::Actix | Dialect::Axum => self.rust(handler, &path_names, &models, &mut collector),
            Dialect::Spring | Dialect::JaxRs => self.java(handler, &models, &mut collector),
            Dialect::Gin => {
                self.gin(handler, &models, &mut collector);
                None
            }
            Dialect::React | Dialect::Angular | Dialect::Generic => None,
        };

        Inference {
            parameters: collector.specs,
            response_shape,
        }
    }

    fn path_placeholders(&self, path: &str, collector: &mut Collector) -> Vec<String> {
        let mut names = Vec::new();
        for caps in self.placeholder.captures_iter(path) {
            let (name, converter) = if let Some(name) = caps.get(1) {
                (name.as_str(), None)
            } else if let Some(name) = caps.get(2) {
                (name.as_str(), caps.get(3).map(|c| c.as_str()))
            } else if let Some(name) = caps.get(5) {
                (name.as_str(), caps.get(4).map(|c| c.as_str()))
            } else {
                continue;
            };
            let spec = |value_type| ParameterSpec::new(name, ParamLocation::Path, value_type, true);
            match converter {
                Some("int" | "float" | "long" | "double" | "decimal") => {
                    collector.strong(spec(ValueType::Number))
                }
                Some("bool") => collector.strong(spec(ValueType::Boolean)),
                _ => collector.weak(spec(ValueType::String)),
            }
            names.push(name.to_string());
        }
        names
    }

    fn python(
        &self,
        dialect: Dialect,
        handler: &str,
        path_names: &[String],
        models: &Models,
        collector: &mut Collector,
    ) -> Option<TypeSketch> {
        if let Some(args) = python_signature(handler) {
            for arg in split_top_level(&args) {
                self.python_arg(dialect, &arg, path_names, models, collector);
            }
        }

        for caps in self.flask_access.captures_iter(handler) {
            push_accessed(collector, &caps[1], &caps[2], &caps[3]);
        }
        for alias in self.flask_alias.captures_iter(handler) {
            let pattern = format!(r#"\b{}\s*(\.get\(|\[)\s*['"]([\w-]+)['"]"#, regex::escape(&alias[1]));
            let Ok(access) = Regex::new(&pattern) else {
                continue;
            };
            for caps in access.captures_iter(handler) {
                push_accessed(collector, "json", &caps[1], &caps[2]);
            }
        }

        let raw = self
            .py_response_model
            .captures(handler)
            .or_else(|| self.py_return.captures(handler))?;
        sketch(&raw[1], models)
    }

    fn python_arg(
        &self,
        dialect: Dialect,
        arg: &str,
        path_names: &[String],
        models: &Models,
        collector: &mut Collector,
    ) {
        let arg = arg.trim();
        if arg.is_empty() || arg.starts_with('*') || arg == "/" {
            return;
        }
        let (head, default) = match arg.split_once('=') {
            Some((head, default)) => (head.trim(), Some(default.trim())),
            None => (arg, None),
        };
        let (name, annotation) = match head.split_once(':') {
            Some((name, annotation)) => (name.trim(), Some(annotation.trim())),
            None => (head, None),
        };
        if PY_SKIPPED_ARGS.contains(&name) {
            return;
        }
        if default.is_some_and(|d| d.starts_with("Depends(") || d.starts_with("Security(")) {
            return;
        }

        let is_path = path_names.iter().any(|p| p == name);
        if dialect != Dialect::FastApi && !is_path {
            return;
        }
        let required = match default {
            None => true,
            Some(d) => d.starts_with("...") || d.contains("(...") || d.contains("(default=..."),
        };
        let type_ref = annotation.map_or(TypeRef::Scalar(ValueType::String), parse_type);
        let marker = default.and_then(|d| d.split('(').next()).unwrap_or("");

        let location = if is_path {
            ParamLocation::Path
        } else {
            match marker {
                "Header" => ParamLocation::Header,
                "Query" => ParamLocation::Query,
                "Body" => ParamLocation::Body,
                _ if matches!(unwrap_optional(&type_ref), TypeRef::Named(n) if models.contains_key(n)) => {
                    // A model-typed argument is the request body itself.
                    if let TypeRef::Named(model) = unwrap_optional(&type_ref) {
                        for spec in expand_model(model, ParamLocation::Body, models, 1) {
                            collector.strong(spec);
                        }
                    }
                    return;
                }
                _ => ParamLocation::Query,
            }
        };
        collector.strong(build_spec(name, &type_ref, location, required, models, 0));
    }

    fn typescript(&self, handler: &str, models: &Models, collector: &mut Collector) -> Option<TypeSketch> {
        for caps in self.nest_param.captures_iter(handler) {
            let location = match &caps[1] {
                "Body" => ParamLocation::Body,
                "Query" => ParamLocation::Query,
                "Param" => ParamLocation::Path,
                _ => ParamLocation::Header,
            };
            let type_ref = parse_type(&caps[5]);
            let optional = caps.get(4).is_some();
            match (caps.get(2), unwrap_optional(&type_ref)) {
                (None, TypeRef::Named(model)) if models.contains_key(model) => {
                    for spec in expand_model(model, location, models, 1) {
                        collector.strong(spec);
                    }
                }
                (name, _) => {
                    let name = name.map_or(&caps[3], |n| n.as_str());
                    let required = !optional && location != ParamLocation::Header;
                    collector.strong(build_spec(name, &type_ref, location, required, models, 0));
                }
            }
        }

        for caps in self.express_destructure.captures_iter(handler) {
            let location = express_location(&caps[2]);
            for binding in caps[1].split(',') {
                let (head, default) = match binding.split_once('=') {
                    Some((head, _)) => (head, true),
                    None => (binding, false),
                };
                let name = head.split(':').next().unwrap_or("").trim();
                if name.is_empty() || name.starts_with("...") {
                    continue;
                }
                let required = !default && location != ParamLocation::Query;
                collector.strong(ParameterSpec::new(name, location, guess_by_name(name), required));
            }
        }

        for caps in self.express_access.captures_iter(handler) {
            let location = express_location(&caps[1]);
            let Some(name) = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str()) else {
                continue;
            };
            if collector.contains(name, location) {
                continue;
            }
            let required = matches!(location, ParamLocation::Body | ParamLocation::Path);
            collector.strong(ParameterSpec::new(name, location, guess_by_name(name), required));
        }

        if let Some(caps) = self.express_cast.captures(handler) {
            for spec in expand_model(&caps[1], ParamLocation::Body, models, 1) {
                collector.strong(spec);
            }
        }

        ["Promise<", "Observable<"].iter().find_map(|wrapper| {
            let start = handler.find(wrapper)? + wrapper.len() - 1;
            sketch(generic_arg(handler, start)?, models)
        })
    }

    fn rust(
        &self,
        handler: &str,
        path_names: &[String],
        models: &Models,
        collector: &mut Collector,
    ) -> Option<TypeSketch> {
        for caps in self.rust_extractor.captures_iter(handler) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let Some(inner) = generic_arg(handler, whole.end() - 1) else {
                continue;
            };
            match &caps[1] {
                "Path" => {
                    let inner = inner.trim().trim_start_matches('(').trim_end_matches(')');
                    for (name, raw) in path_names.iter().zip(split_top_level(inner)) {
                        let type_ref = parse_type(&raw);
                        collector.strong(build_spec(name, &type_ref, ParamLocation::Path, true, models, 0));
                    }
                }
                kind => {
                    let location = if kind == "Query" {
                        ParamLocation::Query
                    } else {
                        ParamLocation::Body
                    };
                    if let TypeRef::Named(model) = parse_type(inner) {
                        for spec in expand_model(&model, location, models, 1) {
                            collector.strong(spec);
                        }
                    }
                }
            }
        }

        let signature_end = handler.find('{').unwrap_or(handler.len());
        let signature = &handler[..signature_end];
        let arrow = signature.find("->")?;
        let start = signature[arrow..].find("Json<")? + arrow + "Json".len();
        sketch(generic_arg(signature, start)?, models)
    }

    fn java(&self, handler: &str, models: &Models, collector: &mut Collector) -> Option<TypeSketch> {
        for caps in self.spring_param.captures_iter(handler) {
            let attrs = caps.get(2).map_or("", |m| m.as_str());
            let type_ref = parse_type(&caps[3]);
            let variable = &caps[4];
            let explicit = first_quoted(attrs);
            let name = explicit.unwrap_or(variable);
            let optional = attrs.contains("required = false")
                || attrs.contains("required=false")
                || attrs.contains("defaultValue");
            match &caps[1] {
                "RequestBody" => match unwrap_optional(&type_ref) {
                    TypeRef::Named(model) if models.contains_key(model) => {
                        for spec in expand_model(model, ParamLocation::Body, models, 1) {
                            collector.strong(spec);
                        }
                    }
                    _ => collector.strong(build_spec(variable, &type_ref, ParamLocation::Body, true, models, 0)),
                },
                kind => {
                    let location = match kind {
                        "PathVariable" => ParamLocation::Path,
                        "RequestHeader" => ParamLocation::Header,
                        _ => ParamLocation::Query,
                    };
                    collector.strong(build_spec(name, &type_ref, location, !optional, models, 0));
                }
            }
        }

        for caps in self.jaxrs_param.captures_iter(handler) {
            let location = match &caps[1] {
                "PathParam" => ParamLocation::Path,
                "QueryParam" => ParamLocation::Query,
                "HeaderParam" => ParamLocation::Header,
                _ => ParamLocation::Body,
            };
            let required = location == ParamLocation::Path;
            collector.strong(build_spec(&caps[2], &parse_type(&caps[3]), location, required, models, 0));
        }

        let start = handler.find("ResponseEntity<")? + "ResponseEntity".len();
        sketch(generic_arg(handler, start)?, models)
    }

    fn gin(&self, handler: &str, models: &Models, collector: &mut Collector) {
        for caps in self.gin_access.captures_iter(handler) {
            let (location, required) = match &caps[1] {
                "Param" => (ParamLocation::Path, true),
                "GetHeader" => (ParamLocation::Header, false),
                "PostForm" => (ParamLocation::Body, true),
                "DefaultPostForm" => (ParamLocation::Body, false),
                _ => (ParamLocation::Query, false),
            };
            collector.strong(ParameterSpec::new(&caps[2], location, guess_by_name(&caps[2]), required));
        }

        for caps in self.gin_bind.captures_iter(handler) {
            let var = regex::escape(&caps[1]);
            let pattern = format!(r"(?:var\s+{var}\s+(\w+))|(?:{var}\s*:=\s*&?(\w+)\s*\{{)");
            let Ok(decl) = Regex::new(&pattern) else {
                continue;
            };
            let Some(model) = decl
                .captures(handler)
                .and_then(|d| d.get(1).or_else(|| d.get(2)))
                .map(|m| m.as_str().to_string())
            else {
                continue;
            };
            for spec in expand_model(&model, ParamLocation::Body, models, 1) {
                collector.strong(spec);
            }
        }
    }

    fn models(&self, family: Family, file: &str) -> Models {
        match family {
            Family::Python => self.python_models(file),
            Family::JavaScript => self.brace_models(file, |line| {
                self.ts_field.captures(line).map(|c| Field {
                    name: c[1].to_string(),
                    raw_type: c[3].to_string(),
                    optional: c.get(2).is_some(),
                })
            }),
            Family::Rust => self.brace_models(file, |line| {
                if line.trim_start().starts_with("//") {
                    return None;
                }
                self.rust_field.captures(line).map(|c| Field {
                    name: c[1].to_string(),
                    raw_type: c[2].to_string(),
                    optional: false,
                })
            }),
            Family::Java => {
                let mut models = self.brace_models(file, |line| {
                    if line.contains(" static ") {
                        return None;
                    }
                    self.java_field.captures(line).map(|c| Field {
                        name: c[2].to_string(),
                        raw_type: c[1].to_string(),
                        optional: false,
                    })
                });
                for caps in self.java_record.captures_iter(file) {
                    let fields = split_top_level(&caps[2])
                        .iter()
                        .filter_map(|component| {
                            let (raw_type, name) = component.trim().rsplit_once(char::is_whitespace)?;
                            Some(Field {
                                name: name.to_string(),
                                raw_type: raw_type.trim().to_string(),
                                optional: false,
                            })
                        })
                        .collect();
                    models.insert(caps[1].to_string(), fields);
                }
                models
            }
            Family::Go => self.go_models(file),
            Family::Any => Models::new(),
        }
    }

    fn python_models(&self, file: &str) -> Models {
        let mut models = Models::new();
        let lines: Vec<&str> = file.lines().collect();
        let mut i = 0;
        while i < lines.len() {
            let Some(caps) = self.py_class.captures(lines[i]) else {
                i += 1;
                continue;
            };
            let class_indent = caps[1].len();
            let mut member_indent = None;
            let mut fields = Vec::new();
            i += 1;
            while i < lines.len() {
                let line = lines[i];
                let trimmed = line.trim_start();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    i += 1;
                    continue;
                }
                let indent = line.len() - trimmed.len();
                if indent <= class_indent {
                    break;
                }
                let member = *member_indent.get_or_insert(indent);
                if indent == member {
                    if let Some(f) = self.py_field.captures(trimmed) {
                        let default = f.get(3).map(|d| d.as_str().trim());
                        fields.push(Field {
                            name: f[1].to_string(),
                            raw_type: f[2].to_string(),
                            optional: default.is_some_and(|d| {
                                !d.starts_with("...") && !d.starts_with("Field(...")
                            }),
                        });
                    }
                }
                i += 1;
            }
            models.insert(caps[2].to_string(), fields);
        }
        models
    }

    /// Models whose members sit one brace level inside a `class|struct|interface` header.
    fn brace_models<F>(&self, file: &str, field: F) -> Models
    where
        F: Fn(&str) -> Option<Field>,
    {
        let mut models = Models::new();
        let lines: Vec<&str> = file.lines().collect();
        let mut i = 0;
        while i < lines.len() {
            let Some(caps) = self.brace_model.captures(lines[i]) else {
                i += 1;
                continue;
            };
            let name = caps[1].to_string();
            let mut depth = brace_delta(lines[i]);
            let mut fields = Vec::new();
            let mut pending_optional = false;
            i += 1;
            while i < lines.len() && depth > 0 {
                let line = lines[i];
                if depth == 1 {
                    let trimmed = line.trim();
                    if trimmed.starts_with("@IsOptional") || trimmed.contains("serde(default") {
                        pending_optional = true;
                    } else if let Some(mut f) = field(line) {
                        f.optional |= pending_optional;
                        pending_optional = false;
                        fields.push(f);
                    }
                }
                depth += brace_delta(line);
                i += 1;
            }
            models.insert(name, fields);
        }
        models
    }

    fn go_models(&self, file: &str) -> Models {
        let mut models = Models::new();
        let lines: Vec<&str> = file.lines().collect();
        let mut i = 0;
        while i < lines.len() {
            let Some(caps) = self.go_struct.captures(lines[i]) else {
                i += 1;
                continue;
            };
            let mut fields = Vec::new();
            i += 1;
            while i < lines.len() && !lines[i].trim_start().starts_with('}') {
                if let Some(f) = self.go_field.captures(lines[i]) {
                    let tag = f.get(3).map_or("", |t| t.as_str());
                    let json_name = tag
                        .split("json:\"")
                        .nth(1)
                        .and_then(|rest| rest.split(['"', ',']).next())
                        .filter(|n| !n.is_empty());
                    if json_name != Some("-") {
                        let raw_type = f[2].to_string();
                        fields.push(Field {
                            name: json_name.unwrap_or(&f[1]).to_string(),
                            optional: tag.contains("omitempty") || raw_type.starts_with('*'),
                            raw_type,
                        });
                    }
                }
                i += 1;
            }
            models.insert(caps[1].to_string(), fields);
        }
        models
    }
}

fn brace_delta(line: &str) -> i32 {
    line.chars().fold(0, |depth, c| match c {
        '{' => depth + 1,
        '}' => depth - 1,
        _ => depth,
    })
}

fn express_location(source: &str) -> ParamLocation {
    match source {
        "body" => ParamLocation::Body,
        "query" => ParamLocation::Query,
        "params" => ParamLocation::Path,
        _ => ParamLocation::Header,
    }
}

fn push_accessed(collector: &mut Collector, source: &str, accessor: &str, name: &str) {
    let location = match source {
        "args" => ParamLocation::Query,
        "headers" => ParamLocation::Header,
        _ => ParamLocation::Body,
    };
    if collector.contains(name, location) {
        return;
    }
    let required = accessor.starts_with('[');
    collector.strong(ParameterSpec::new(name, location, guess_by_name(name), required));
}

/// Type guess for untyped inputs from their name alone.
pub(crate) fn guess_by_name(name: &str) -> ValueType {
    let lower = name.to_ascii_lowercase();
    const NUMERIC: &[&str] = &[
        "age", "count", "page", "limit", "offset", "size", "quantity", "qty", "amount", "price", "total", "year",
    ];
    if NUMERIC.contains(&lower.as_str()) || lower.ends_with("_count") || lower.ends_with("count") && lower.len() > 5 {
        ValueType::Number
    } else if ["is_", "has_"].iter().any(|p| lower.starts_with(p))
        || ["is", "has"].iter().any(|p| {
            name.strip_prefix(p)
                .and_then(|rest| rest.chars().next())
                .is_some_and(char::is_uppercase)
        })
        || ["enabled", "active", "verified", "confirmed"].contains(&lower.as_str())
    {
        ValueType::Boolean
    } else {
        ValueType::String
    }
}

fn first_quoted(text: &str) -> Option<&str> {
    let start = text.find('"')? + 1;
    let end = text[start..].find('"')? + start;
    Some(&text[start..end])
}

/// Text between the `<` at `open` and its matching `>`.
fn generic_arg(text: &str, open: usize) -> Option<&str> {
    if text.as_bytes().get(open) != Some(&b'<') {
        return None;
    }
    let mut depth = 0;
    for (i, c) in text[open..].char_indices() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open + 1..open + i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Arguments of the first `def` in `handler`, spanning lines if needed.
fn python_signature(handler: &str) -> Option<String> {
    let def = handler.find("def ")?;
    let open = handler[def..].find('(')? + def;
    let mut depth = 0;
    for (i, c) in handler[open..].char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(handler[open + 1..open + i].replace('\n', " "));
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on commas that are not nested in brackets.
fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '(' | '[' | '<' | '{' => depth += 1,
            ')' | ']' | '>' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current).trim().to_string());
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn unwrap_generic<'a>(text: &'a str, names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| {
        let rest = text.strip_prefix(name)?;
        let inner = rest
            .strip_prefix('<')
            .and_then(|r| r.strip_suffix('>'))
            .or_else(|| rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')))?;
        Some(inner)
    })
}

fn parse_type(raw: &str) -> TypeRef {
    let text = raw.trim().trim_start_matches('&').trim();
    if let Some(inner) = text.strip_prefix('*') {
        return TypeRef::Optional(Box::new(parse_type(inner)));
    }
    if let Some(inner) = unwrap_generic(text, &["Optional", "Option"]) {
        return TypeRef::Optional(Box::new(parse_type(inner)));
    }
    for none in ["| None", "| null", "| undefined"] {
        if let Some(inner) = text.strip_suffix(none) {
            return TypeRef::Optional(Box::new(parse_type(inner)));
        }
    }
    if let Some(inner) = unwrap_generic(
        text,
        &["List", "list", "Vec", "Array", "Set", "set", "HashSet", "Sequence", "Collection", "Iterable"],
    ) {
        return TypeRef::List(Box::new(parse_type(inner)));
    }
    if let Some(inner) = text.strip_suffix("[]") {
        return TypeRef::List(Box::new(parse_type(inner)));
    }
    if let Some(inner) = text.strip_prefix("[]") {
        return TypeRef::List(Box::new(parse_type(inner)));
    }
    if unwrap_generic(text, &["Dict", "dict", "HashMap", "BTreeMap", "Map", "Record"]).is_some()
        || text.starts_with("map[")
    {
        return TypeRef::Scalar(ValueType::Object);
    }

    let base = text.split('<').next().unwrap_or(text);
    let base = base.rsplit("::").next().unwrap_or(base);
    let base = base.rsplit('.').next().unwrap_or(base).trim();
    let scalar = match base.to_ascii_lowercase().as_str() {
        "str" | "string" | "char" | "uuid" | "emailstr" | "datetime" | "date" | "time" | "localdate"
        | "localdatetime" | "instant" | "httpurl" | "url" => Some(ValueType::String),
        "int" | "float" | "number" | "integer" | "long" | "short" | "double" | "decimal" | "bigdecimal"
        | "biginteger" | "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u8" | "u16" | "u32" | "u64"
        | "u128" | "usize" | "f32" | "f64" | "int32" | "int64" | "uint" | "uint32" | "uint64" | "float32"
        | "float64" => Some(ValueType::Number),
        "bool" | "boolean" => Some(ValueType::Boolean),
        "dict" | "object" | "value" | "jsonnode" => Some(ValueType::Object),
        "list" => Some(ValueType::Array),
        "any" | "unknown" | "interface{}" => Some(ValueType::Unknown),
        _ => None,
    };
    match scalar {
        Some(value_type) => TypeRef::Scalar(value_type),
        None if base.starts_with(|c: char| c.is_ascii_uppercase()) => TypeRef::Named(base.to_string()),
        None => TypeRef::Scalar(ValueType::Unknown),
    }
}

fn unwrap_optional(type_ref: &TypeRef) -> &TypeRef {
    match type_ref {
        TypeRef::Optional(inner) => unwrap_optional(inner),
        other => other,
    }
}

fn build_spec(
    name: &str,
    type_ref: &TypeRef,
    location: ParamLocation,
    required: bool,
    models: &Models,
    depth: usize,
) -> ParameterSpec {
    match type_ref {
        TypeRef::Optional(inner) => build_spec(name, inner, location, false, models, depth),
        TypeRef::Scalar(value_type) => ParameterSpec::new(name, location, *value_type, required),
        TypeRef::List(item) => ParameterSpec::new(name, location, ValueType::Array, required)
            .with_children(vec![build_spec("item", item, location, true, models, depth + 1)]),
        TypeRef::Named(model) if depth < MAX_MODEL_DEPTH && models.contains_key(model) => {
            ParameterSpec::new(name, location, ValueType::Object, required)
                .with_children(expand_model(model, location, models, depth + 1))
        }
        TypeRef::Named(_) => ParameterSpec::new(name, location, ValueType::Unknown, required),
    }
}

fn expand_model(model: &str, location: ParamLocation, models: &Models, depth: usize) -> Vec<ParameterSpec> {
    models
        .get(model)
        .map(|fields| {
            fields
                .iter()
                .map(|f| build_spec(&f.name, &parse_type(&f.raw_type), location, !f.optional, models, depth))
                .collect()
        })
        .unwrap_or_default()
}

fn sketch(raw: &str, models: &Models) -> Option<TypeSketch> {
    let (type_ref, is_list) = match parse_type(raw) {
        TypeRef::List(item) => (*item, true),
        other => (other, false),
    };
    match unwrap_optional(&type_ref) {
        TypeRef::Named(name) => Some(TypeSketch {
            name: name.clone(),
            is_list,
            fields: expand_model(name, ParamLocation::Body, models, 1),
        }),
        _ => None,
    }
}
