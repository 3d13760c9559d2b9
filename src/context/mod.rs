pub mod params;
pub mod types;

pub use types::{
    AdditionalContext, CallSite, ContextEntry, Definition, MatchQuality, ParamLocation, ParameterSpec, ValueType,
};

use std::cmp::Reverse;
use std::sync::Arc;
use tracing::{debug, info_span, instrument, warn, Instrument};

use crate::identify::{InterfaceDescriptor, InterfaceKind};
use crate::pool;
use crate::resolver::{Resolver, SearchHit};
use params::ParamInference;

#[derive(Debug, Clone)]
pub struct AssemblerOptions {
    pub lines_before: usize,
    pub lines_after: usize,
    pub excerpt_max_lines: usize,
    pub call_site_cap: usize,
    pub context_chars: usize,
    pub workers: usize,
    pub git_ref: Option<String>,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            lines_before: 5,
            lines_after: 20,
            excerpt_max_lines: 50,
            call_site_cap: 20,
            context_chars: 10_000,
            workers: pool::default_workers(),
            git_ref: None,
        }
    }
}

/// Fetches definitions and call sites for identified interfaces through the
/// resolver and packs them into a budgeted [`AdditionalContext`].
#[derive(Clone)]
pub struct ContextAssembler {
    resolver: Arc<Resolver>,
    inference: Arc<ParamInference>,
    options: AssemblerOptions,
}

impl ContextAssembler {
    pub fn new(resolver: Arc<Resolver>, options: AssemblerOptions) -> Result<Self, regex::Error> {
        Ok(Self {
            resolver,
            inference: Arc::new(ParamInference::new()?),
            options,
        })
    }

    /// Descriptors are worked on concurrently; entries are inserted in
    /// descriptor order once all of them are done.
    #[instrument(skip_all, fields(descriptors = descriptors.len()))]
    pub async fn assemble(&self, descriptors: &[InterfaceDescriptor]) -> AdditionalContext {
        let entries = pool::fan_out(descriptors.to_vec(), self.options.workers, |descriptor| {
            let assembler = self.clone();
            let span = info_span!("assemble", interface = %descriptor.identity);
            async move { assembler.assemble_one(descriptor).await }.instrument(span)
        })
        .await;

        let mut context = AdditionalContext::new(self.options.context_chars);
        for entry in entries {
            let identity = entry.definition.descriptor.identity.clone();
            let cost = entry.char_cost();
            if !context.try_insert(entry) {
                warn!(
                    interface = %identity,
                    cost,
                    remaining = context.remaining_chars(),
                    limit = context.limit(),
                    "context budget exhausted; entry kept out of the prompt"
                );
            }
        }
        debug!(entries = context.len(), used = context.used_chars(), "context assembled");
        context
    }

    async fn assemble_one(&self, descriptor: InterfaceDescriptor) -> ContextEntry {
        let definition = if descriptor.is_removed() {
            Definition::empty(
                descriptor.clone(),
                "interface removed by this change; definition lookup skipped",
            )
        } else {
            self.definition(descriptor.clone()).await
        };
        if let Some(reason) = &definition.failure {
            warn!(%reason, "definition unavailable");
        }
        let call_sites = self.call_sites(&descriptor, &definition).await;
        ContextEntry {
            definition,
            call_sites,
        }
    }

    /// Locate the declaration by searching for its literal spelling, falling
    /// back to the line the identifier saw it on.
    async fn definition(&self, descriptor: InterfaceDescriptor) -> Definition {
        let query = descriptor.search_literal.clone();
        let searched = match self.resolver.search(&query, 0).await {
            Ok(outcome) => match best_hit(&descriptor, &outcome.hits) {
                Some((best, quality)) => Ok((best.clone(), quality)),
                None => Err(format!("not found (searched with {})", outcome.served_by)),
            },
            Err(err) => Err(format!("search failed: {}", err)),
        };

        let located = match searched {
            Ok((best, quality)) => {
                debug!(file = %best.path, line = ?best.line, ?quality, "definition candidate");
                self.open_at(&best.path, best.line, &query)
                    .await
                    .map(|(text, index)| (best.path, text, index, quality))
            }
            Err(reason) => Err(reason),
        };
        let (path, text, index, quality) = match located {
            Ok(found) => found,
            Err(reason) => {
                debug!(%reason, file = %descriptor.declaring_file, "falling back to the declaring line");
                match self
                    .open_at(&descriptor.declaring_file, Some(descriptor.declaring_line), &query)
                    .await
                {
                    Ok((text, index)) => (descriptor.declaring_file.clone(), text, index, MatchQuality::Exact),
                    Err(_) => return Definition::empty(descriptor, reason),
                }
            }
        };

        let lines: Vec<&str> = text.lines().collect();
        let handler_end = (index + 1 + self.options.lines_after).min(lines.len());
        let handler = lines[index..handler_end].join("\n");
        let inference = self.inference.infer(&descriptor, &handler, &text);
        let source_excerpt = excerpt(&lines, index, &self.options);

        Definition {
            descriptor,
            parameters: inference.parameters,
            response_shape: inference.response_shape,
            source_excerpt,
            location: Some((path, index + 1)),
            match_quality: Some(quality),
            failure: None,
        }
    }

    /// Fetch `path` and find the line holding `literal`: `line` when it still
    /// does, otherwise the first line that does.
    async fn open_at(&self, path: &str, line: Option<usize>, literal: &str) -> Result<(String, usize), String> {
        let text = self
            .resolver
            .fetch_file(path, self.options.git_ref.as_deref())
            .await
            .map_err(|err| format!("fetch of {} failed: {}", path, err))?;
        let index = {
            let lines: Vec<&str> = text.lines().collect();
            line.map(|l| l.saturating_sub(1))
                .filter(|i| lines.get(*i).is_some_and(|l| l.contains(literal)))
                .or_else(|| lines.iter().position(|l| l.contains(literal)))
        };
        match index {
            Some(index) => Ok((text, index)),
            None => Err(format!("{} no longer contains {}", path, literal)),
        }
    }

    async fn call_sites(&self, descriptor: &InterfaceDescriptor, definition: &Definition) -> Vec<CallSite> {
        let query = descriptor.identity.search_text();
        let outcome = match self.resolver.search(query, 0).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "call-site search failed");
                return Vec::new();
            }
        };
        outcome
            .hits
            .iter()
            .filter(|hit| {
                let at = |file: &str, line: usize| hit.path == file && hit.line == Some(line);
                let is_definition = definition
                    .location
                    .as_ref()
                    .is_some_and(|(file, line)| at(file, *line));
                !is_definition && !at(&descriptor.declaring_file, descriptor.declaring_line)
            })
            .take(self.options.call_site_cap)
            .map(|hit| CallSite {
                file: hit.path.clone(),
                line: hit.line,
                excerpt: hit.content.trim().to_string(),
            })
            .collect()
    }
}

/// How well a hit's line matches the descriptor's declaration.
fn match_quality(descriptor: &InterfaceDescriptor, hit: &SearchHit) -> MatchQuality {
    if !hit.content.contains(descriptor.search_literal.as_str()) {
        return MatchQuality::Weak;
    }
    let lower = hit.content.to_ascii_lowercase();
    let declares = match descriptor.kind {
        InterfaceKind::Endpoint => descriptor
            .identity
            .method
            .map_or(true, |m| lower.contains(&m.as_str().to_ascii_lowercase())),
        InterfaceKind::Component => ["function ", "const ", "class ", "selector"]
            .iter()
            .any(|k| hit.content.contains(k)),
    };
    if declares {
        MatchQuality::Exact
    } else {
        MatchQuality::Partial
    }
}

/// Highest quality first, then the declaring file, then search order.
fn best_hit<'a>(descriptor: &InterfaceDescriptor, hits: &'a [SearchHit]) -> Option<(&'a SearchHit, MatchQuality)> {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| (i, hit, match_quality(descriptor, hit)))
        .max_by_key(|(i, hit, quality)| (*quality, hit.path == descriptor.declaring_file, Reverse(*i)))
        .map(|(_, hit, quality)| (hit, quality))
}

/// Lines around `index`, capped at `excerpt_max_lines` with an explicit marker.
fn excerpt(lines: &[&str], index: usize, options: &AssemblerOptions) -> String {
    let start = index.saturating_sub(options.lines_before);
    let end = (index + 1 + options.lines_after).min(lines.len());
    let window = &lines[start..end];
    let cap = options.excerpt_max_lines.max(1);
    if window.len() <= cap {
        return window.join("\n");
    }
    let mut text = window[..cap].join("\n");
    text.push_str(&format!("\n... (excerpt truncated, {} more lines)", window.len() - cap));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::parse_diff;
    use crate::identify::{ChangeTag, Dialect, HttpMethod, Identifier};
    use crate::identify::types::{Confidence, Identity};
    use crate::resolver::walk::FilesystemWalk;
    use crate::resolver::{AccessError, AccessStrategy, ResolverOptions, StrategyKind};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn endpoint(method: HttpMethod, path: &str, file: &str, line: usize, change: ChangeTag) -> InterfaceDescriptor {
        InterfaceDescriptor {
            kind: InterfaceKind::Endpoint,
            identity: Identity::endpoint(Some(method), path),
            declaring_file: file.to_string(),
            declaring_line: line,
            dialect: Dialect::Express,
            change,
            confidence: Confidence::High,
            search_literal: path.to_string(),
        }
    }

    async fn assembler(dir: &TempDir, options: AssemblerOptions) -> ContextAssembler {
        let candidates: Vec<Box<dyn AccessStrategy>> = vec![Box::new(FilesystemWalk::new(dir.path()))];
        let resolver = Resolver::detect(candidates, ResolverOptions::default()).await.unwrap();
        ContextAssembler::new(Arc::new(resolver), options).unwrap()
    }

    fn codebase() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/routes")).unwrap();
        std::fs::write(
            dir.path().join("src/routes/users.ts"),
            "import { Router } from 'express';\n\
             const router = Router();\n\
             router.post('/api/users', async (req, res) => {\n\
             \x20 const { name, email } = req.body;\n\
             \x20 res.status(201).json(await create(name, email));\n\
             });\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("src/client.ts"),
            "export const createUser = (u) => fetch('/api/users', { method: 'POST', body: u });\n\
             export const removeUser = (id) => fetch(`/api/users/:id`, { method: 'DELETE' });\n",
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_assembles_definition_and_call_sites() {
        let dir = codebase();
        let assembler = assembler(&dir, AssemblerOptions::default()).await;
        let descriptor = endpoint(HttpMethod::Post, "/api/users", "src/routes/users.ts", 3, ChangeTag::Added);
        let context = assembler.assemble(std::slice::from_ref(&descriptor)).await;

        let entry = context.get(&descriptor.key()).unwrap();
        let definition = &entry.definition;
        assert!(definition.failure.is_none());
        assert_eq!(definition.location, Some(("src/routes/users.ts".to_string(), 3)));
        assert_eq!(definition.match_quality, Some(MatchQuality::Exact));
        let names: Vec<&str> = definition.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["name", "email"]);
        assert!(definition.source_excerpt.starts_with("import { Router }"));

        assert_eq!(entry.call_sites.len(), 2);
        assert!(entry.call_sites.iter().all(|c| c.file == "src/client.ts"));
    }

    #[tokio::test]
    async fn test_unresolvable_interface_degrades() {
        let dir = codebase();
        let assembler = assembler(&dir, AssemblerOptions::default()).await;
        let ghost = endpoint(HttpMethod::Get, "/api/ghosts", "src/ghosts.ts", 1, ChangeTag::Added);
        let found = endpoint(HttpMethod::Post, "/api/users", "src/routes/users.ts", 3, ChangeTag::Added);
        let context = assembler.assemble(&[ghost.clone(), found.clone()]).await;

        let entry = context.get(&ghost.key()).unwrap();
        assert!(entry.definition.source_excerpt.is_empty());
        assert!(entry.definition.failure.as_deref().unwrap().starts_with("not found"));
        assert!(context.get(&found.key()).unwrap().definition.failure.is_none());
    }

    #[tokio::test]
    async fn test_removed_interface_skips_definition() {
        let dir = codebase();
        let assembler = assembler(&dir, AssemblerOptions::default()).await;
        let removed = endpoint(HttpMethod::Delete, "/api/users/:id", "src/routes/users.ts", 9, ChangeTag::Removed);
        let context = assembler.assemble(std::slice::from_ref(&removed)).await;

        let entry = context.get(&removed.key()).unwrap();
        assert!(entry.definition.source_excerpt.is_empty());
        assert!(entry.definition.failure.as_deref().unwrap().contains("removed"));
        assert_eq!(entry.call_sites.len(), 1);
        assert_eq!(entry.call_sites[0].line, Some(2));
    }

    #[tokio::test]
    async fn test_budget_rejects_whole_entries() {
        let dir = codebase();
        let options = AssemblerOptions {
            context_chars: 40,
            ..AssemblerOptions::default()
        };
        let assembler = assembler(&dir, options).await;
        let descriptor = endpoint(HttpMethod::Post, "/api/users", "src/routes/users.ts", 3, ChangeTag::Added);
        let context = assembler.assemble(std::slice::from_ref(&descriptor)).await;
        assert_eq!(context.len(), 0);
        assert_eq!(context.rejected(), &[descriptor.key()]);
        assert!(context.used_chars() <= 40);
        let kept = context.assembled(&descriptor.key()).unwrap();
        assert!(context.is_over_budget(&descriptor.key()));
        assert_eq!(kept.definition.parameters.len(), 2);
    }

    /// Write `source` to `path`, identify the declaration on `line` from a
    /// one-line diff and assemble its context over the same tree.
    async fn assemble_declared(path: &str, source: &str, line: usize) -> (InterfaceDescriptor, AdditionalContext) {
        let dir = TempDir::new().unwrap();
        let full = dir.path().join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(&full, source).unwrap();

        let declared = source.lines().nth(line - 1).unwrap();
        let raw = format!(
            "diff --git a/{p} b/{p}\n--- a/{p}\n+++ b/{p}\n@@ -{old},0 +{line},1 @@\n+{declared}\n",
            p = path,
            old = line - 1,
        );
        let sources = HashMap::from([(path.to_string(), source.to_string())]);
        let identification = Identifier::builtin()
            .unwrap()
            .with_sources(sources)
            .identify(&parse_diff(&raw).unwrap());
        assert_eq!(identification.descriptors.len(), 1, "{}", path);
        let descriptor = identification.descriptors[0].clone();

        let context = assembler(&dir, AssemblerOptions::default())
            .await
            .assemble(std::slice::from_ref(&descriptor))
            .await;
        (descriptor, context)
    }

    fn located(descriptor: &InterfaceDescriptor, context: &AdditionalContext) -> Option<(String, usize)> {
        let definition = &context.get(&descriptor.key()).unwrap().definition;
        assert_eq!(definition.failure, None, "{}", descriptor.identity);
        definition.location.clone()
    }

    #[tokio::test]
    async fn test_django_route_found_by_declared_spelling() {
        let source = "from django.urls import path\nfrom . import views\n\nurlpatterns = [\n    path('users/<int:pk>/', views.detail),\n]\n";
        let (descriptor, context) = assemble_declared("app/urls.py", source, 5).await;
        assert_eq!(descriptor.identity.to_string(), "GET /users/<int:pk>");
        assert_eq!(located(&descriptor, &context), Some(("app/urls.py".to_string(), 5)));
    }

    #[tokio::test]
    async fn test_nest_route_under_controller_prefix_is_found() {
        let source = "import { Controller, Get, Param } from '@nestjs/common';\n\n@Controller('users')\nexport class UsersController {\n  @Get(':id')\n  findOne(@Param('id') id: string) {\n    return { id };\n  }\n}\n";
        let (descriptor, context) = assemble_declared("src/users.controller.ts", source, 5).await;
        assert_eq!(descriptor.identity.to_string(), "GET /users/:id");
        assert_eq!(located(&descriptor, &context), Some(("src/users.controller.ts".to_string(), 5)));
    }

    #[tokio::test]
    async fn test_fastapi_route_under_router_prefix_is_found() {
        let source = "from fastapi import APIRouter\n\nrouter = APIRouter(prefix=\"/tabs\")\n\n@router.post(\"/generate\")\ndef generate(payload: dict):\n    return payload\n";
        let (descriptor, context) = assemble_declared("app/tabs.py", source, 5).await;
        assert_eq!(descriptor.identity.to_string(), "POST /tabs/generate");
        assert_eq!(located(&descriptor, &context), Some(("app/tabs.py".to_string(), 5)));
    }

    /// Reads files but never finds anything, like a stale remote index.
    struct BlindSearch(FilesystemWalk);

    #[async_trait::async_trait]
    impl AccessStrategy for BlindSearch {
        fn kind(&self) -> StrategyKind {
            self.0.kind()
        }

        async fn detect(&self) -> Result<(), AccessError> {
            self.0.detect().await
        }

        async fn search(&self, _query: &str, _context_lines: usize) -> Result<Vec<SearchHit>, AccessError> {
            Ok(Vec::new())
        }

        async fn fetch_file(&self, path: &str, git_ref: Option<&str>) -> Result<String, AccessError> {
            self.0.fetch_file(path, git_ref).await
        }
    }

    #[tokio::test]
    async fn test_search_miss_falls_back_to_declaring_line() {
        let dir = codebase();
        let candidates: Vec<Box<dyn AccessStrategy>> = vec![Box::new(BlindSearch(FilesystemWalk::new(dir.path())))];
        let resolver = Resolver::detect(candidates, ResolverOptions::default()).await.unwrap();
        let assembler = ContextAssembler::new(Arc::new(resolver), AssemblerOptions::default()).unwrap();

        let declared = endpoint(HttpMethod::Post, "/api/users", "src/routes/users.ts", 3, ChangeTag::Added);
        let moved = endpoint(HttpMethod::Post, "/api/users", "src/routes/users.ts", 1, ChangeTag::Modified);
        let context = assembler.assemble(std::slice::from_ref(&declared)).await;
        let definition = &context.get(&declared.key()).unwrap().definition;
        assert_eq!(definition.location, Some(("src/routes/users.ts".to_string(), 3)));
        let names: Vec<&str> = definition.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["name", "email"]);

        // A stale line number still lands on the line holding the literal.
        let context = assembler.assemble(std::slice::from_ref(&moved)).await;
        let definition = &context.get(&moved.key()).unwrap().definition;
        assert_eq!(definition.location, Some(("src/routes/users.ts".to_string(), 3)));
    }

    #[test]
    fn test_excerpt_marks_truncation() {
        let lines: Vec<String> = (1..=40).map(|i| format!("line {}", i)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let options = AssemblerOptions {
            lines_before: 5,
            lines_after: 30,
            excerpt_max_lines: 10,
            ..AssemblerOptions::default()
        };
        let text = excerpt(&refs, 10, &options);
        assert!(text.starts_with("line 6\n"));
        assert!(text.ends_with("... (excerpt truncated, 25 more lines)"));
    }
}
