//! Embedded copies of the demo scripts in `lib/scripts/`.
//!
//! The scripts are baked into the binary at compile time via
//! `include_bytes!()` so `httpscript --demo` works without a checkout.
//! [`crate::script::EmbeddedLoader`] serves them by name.

/// A single embedded script file.
pub struct EmbeddedFile {
    pub name: &'static str,
    pub content: &'static [u8],
}

impl EmbeddedFile {
    /// File name without the `.lua` extension.
    pub fn stem(&self) -> &'static str {
        self.name.strip_suffix(".lua").unwrap_or(self.name)
    }
}

/// All embedded `.lua` files from `lib/scripts/`.
pub static EMBEDDED_SCRIPTS: &[EmbeddedFile] = &[
    EmbeddedFile { name: "delayed-hello.lua",     content: include_bytes!("../../lib/scripts/delayed-hello.lua") },
    EmbeddedFile { name: "hello.lua",             content: include_bytes!("../../lib/scripts/hello.lua") },
    EmbeddedFile { name: "http-get.lua",          content: include_bytes!("../../lib/scripts/http-get.lua") },
    EmbeddedFile { name: "http-get-404.lua",      content: include_bytes!("../../lib/scripts/http-get-404.lua") },
    EmbeddedFile { name: "http-get-parallel.lua", content: include_bytes!("../../lib/scripts/http-get-parallel.lua") },
];

/// Embedded JSON bodies for the demo routes, keyed by route path.
pub static DEMO_ROUTES: &[(&str, &[u8])] = &[
    ("/company/info", include_bytes!("../../lib/fixtures/company-info.json")),
    ("/company/ceo",  include_bytes!("../../lib/fixtures/ceo-list.json")),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_scripts_are_utf8() {
        for f in EMBEDDED_SCRIPTS {
            assert!(std::str::from_utf8(f.content).is_ok(), "{} is not UTF-8", f.name);
        }
    }

    #[test]
    fn demo_routes_are_json() {
        for (path, body) in DEMO_ROUTES {
            assert!(
                serde_json::from_slice::<serde_json::Value>(body).is_ok(),
                "{path} body is not JSON"
            );
        }
    }

    #[test]
    fn stem_strips_extension() {
        assert_eq!(EMBEDDED_SCRIPTS[1].stem(), "hello");
    }
}
