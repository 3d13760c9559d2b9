use reqwest::Url;
use std::collections::BTreeMap;

/// Name of the placeholder a route segment declares, if any:
/// `:id`, `*rest`, `{id}`, `{id:int}`, `<id>` or `<int:id>`.
pub fn placeholder(segment: &str) -> Option<&str> {
    let name = if let Some(name) = segment.strip_prefix(':').or_else(|| segment.strip_prefix('*')) {
        name
    } else if let Some(inner) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        inner.split(':').next().unwrap_or(inner)
    } else if let Some(inner) = segment.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
        inner.rsplit(':').next().unwrap_or(inner)
    } else {
        return None;
    };
    let name = name.trim();
    (!name.is_empty()).then_some(name)
}

/// Placeholder names of a route template, in order.
pub fn placeholders(template: &str) -> Vec<String> {
    template
        .split('/')
        .filter_map(placeholder)
        .map(str::to_string)
        .collect()
}

/// Append the route template to the path of `url`, replacing every
/// placeholder segment with its value. Each value is pushed as a single
/// segment, so separators inside it are percent-encoded.
pub fn substitute(url: &mut Url, template: &str, values: &BTreeMap<String, String>) -> Result<(), String> {
    let base = url.to_string();
    let mut segments = url
        .path_segments_mut()
        .map_err(|()| format!("{} cannot be a base URL", base))?;
    segments.pop_if_empty();
    for segment in template.trim_start_matches('/').split('/') {
        match placeholder(segment) {
            Some(name) => {
                let value = values
                    .get(name)
                    .ok_or_else(|| format!("no value for path parameter '{}'", name))?;
                segments.push(value);
            }
            None => {
                segments.push(segment);
            }
        }
    }
    Ok(())
}
