//! Maps a URI to the workload that handles its scheme.

use tracing::debug;
use url::Url;

use crate::config::{Config, MimeHandler};
use crate::error::{QubesomeError, QubesomeResult};

/// A workload to run in a profile with the given arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRequest {
    pub workload: String,
    pub profile: String,
    pub args: Vec<String>,
}

impl WorkloadRequest {
    fn from_handler(handler: &MimeHandler, uri: &str, forced_profile: Option<&str>) -> Self {
        Self {
            workload: handler.workload.clone(),
            profile: forced_profile.unwrap_or(&handler.profile).to_string(),
            args: vec![uri.to_string()],
        }
    }
}

/// Resolve `args` (exactly one URI) to a workload request.
///
/// A scheme listed in `mimeHandlers` picks that handler, anything else goes
/// to `defaultMimeHandler`. When `forced_profile` is set (the request came
/// through a profile socket) the handler's profile is replaced by it.
pub fn resolve(
    config: &Config,
    args: &[String],
    forced_profile: Option<&str>,
) -> QubesomeResult<WorkloadRequest> {
    let [uri] = args else {
        return Err(QubesomeError::InvalidArgs(format!(
            "expected exactly one uri, got {}",
            args.len()
        )));
    };

    let scheme = Url::parse(uri).ok().map(|u| u.scheme().to_string());
    let handler = scheme
        .as_deref()
        .and_then(|s| config.mime_handlers.get(s))
        .or(config.default_mime_handler.as_ref())
        .ok_or_else(|| QubesomeError::UnhandledScheme(uri.clone()))?;

    let request = WorkloadRequest::from_handler(handler, uri, forced_profile);
    debug!(
        uri = %uri,
        scheme = scheme.as_deref().unwrap_or(""),
        workload = %request.workload,
        profile = %request.profile,
        "mime handler resolved"
    );
    Ok(request)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn handler(workload: &str, profile: &str) -> MimeHandler {
        MimeHandler {
            workload: workload.into(),
            profile: profile.into(),
        }
    }

    fn config(default: Option<MimeHandler>) -> Config {
        Config {
            mime_handlers: BTreeMap::from([
                ("https".to_string(), handler("firefox", "untrusted")),
                ("slack".to_string(), handler("slack", "work")),
            ]),
            default_mime_handler: default,
            ..Config::default()
        }
    }

    fn one(uri: &str) -> Vec<String> {
        vec![uri.to_string()]
    }

    #[test]
    fn scheme_selects_handler() {
        let req = resolve(&config(None), &one("slack://open?team=T1"), None).unwrap();
        assert_eq!(
            req,
            WorkloadRequest {
                workload: "slack".into(),
                profile: "work".into(),
                args: one("slack://open?team=T1"),
            }
        );
    }

    #[test]
    fn inception_forces_caller_profile() {
        let req = resolve(&config(None), &one("https://example.com"), Some("personal")).unwrap();
        assert_eq!(req.workload, "firefox");
        assert_eq!(req.profile, "personal");
        assert_eq!(req.args, one("https://example.com"));
    }

    #[test]
    fn unknown_scheme_uses_default_handler() {
        let cfg = config(Some(handler("chrome", "work")));
        let req = resolve(&cfg, &one("gopher://old.example"), None).unwrap();
        assert_eq!(req.workload, "chrome");
        assert_eq!(req.profile, "work");

        let req = resolve(&cfg, &one("example.com/page"), Some("personal")).unwrap();
        assert_eq!(req.workload, "chrome");
        assert_eq!(req.profile, "personal");
        assert_eq!(req.args, one("example.com/page"));
    }

    #[test]
    fn no_handler_is_unhandled_scheme() {
        let err = resolve(&config(None), &one("example.com"), None).unwrap_err();
        assert!(matches!(err, QubesomeError::UnhandledScheme(u) if u == "example.com"));

        let err = resolve(&config(None), &one("ftp://x"), None).unwrap_err();
        assert!(matches!(err, QubesomeError::UnhandledScheme(_)));
    }

    #[test]
    fn requires_exactly_one_argument() {
        let cfg = config(Some(handler("chrome", "work")));
        assert!(matches!(
            resolve(&cfg, &[], None).unwrap_err(),
            QubesomeError::InvalidArgs(_)
        ));
        let two = vec!["https://a".to_string(), "https://b".to_string()];
        assert!(matches!(
            resolve(&cfg, &two, None).unwrap_err(),
            QubesomeError::InvalidArgs(_)
        ));
    }
}
