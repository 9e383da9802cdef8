use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub const DEFAULT_SNIPPET_NAMESPACE: &str = "Lumen.Snippets";

/// Namespaces opened ahead of every snippet by default.
pub const DEFAULT_AUTO_OPEN: &[&str] = &["Lumen.Intrinsic", "Lumen.Canon"];

/// The compiler's "namespace already open" warning, which the auto-open block would otherwise
/// trigger whenever a snippet opens one of those namespaces itself.
pub const NAMESPACE_ALREADY_OPEN: &str = "LMN2001";

/// How snippets are wrapped before compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnippetSettings {
    /// Synthetic namespace every snippet is compiled inside.
    pub namespace: String,
    /// Namespace name to optional alias, opened ahead of user text.
    pub auto_open: BTreeMap<String, Option<String>>,
    /// Diagnostic codes suppressed while compiling snippets.
    pub suppressed_codes: BTreeSet<String>,
}

impl Default for SnippetSettings {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_SNIPPET_NAMESPACE.to_string(),
            auto_open: DEFAULT_AUTO_OPEN
                .iter()
                .map(|ns| (ns.to_string(), None))
                .collect(),
            suppressed_codes: BTreeSet::from([NAMESPACE_ALREADY_OPEN.to_string()]),
        }
    }
}

impl SnippetSettings {
    /// Wrap `text` in the synthetic namespace block with the auto-open statements first.
    pub fn wrap(&self, text: &str) -> String {
        let mut out = format!("namespace {} {{\n", self.namespace);
        for (namespace, alias) in &self.auto_open {
            match alias {
                Some(alias) => out.push_str(&format!("    open {namespace} as {alias};\n")),
                None => out.push_str(&format!("    open {namespace};\n")),
            }
        }
        out.push_str(text);
        if !text.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("}\n");
        out
    }
}
