//! Decisions on whether a request is worth reporting.
//!
//! Resource eligibility is checked before a response is intercepted at all, status
//! eligibility once the status code of the response is known.
use std::borrow::Cow;

use percent_encoding::percent_decode_str;

use crate::config::Settings;
use crate::error::Ineligible;

/// Extensions of resources that are believed to contain content. The empty
/// extension covers paths like `/` and `/blog/post`.
const CONTENT_EXTENSIONS: &[&str] = &["", ".htm", ".html", ".php", ".rss", ".rtf", ".xml"];

/// Resolve the domain a request to `host` is reported under: the host itself if it
/// is configured, the fallback domain if any host may be reported, or nothing.
pub fn resolve_domain<'a>(settings: &'a Settings, host: &'a str) -> Result<&'a str, Ineligible> {
    if settings.domains.iter().any(|domain| domain == host) {
        Ok(host)
    } else if settings.report_any_host {
        Ok(settings.fallback_domain())
    } else {
        Err(Ineligible::UnlistedHost(host.to_owned()))
    }
}

/// Check whether a request for `path` on `host` could be reported, ignoring the
/// outcome of the request.
pub fn check_resource(settings: &Settings, host: &str, path: &str) -> Result<(), Ineligible> {
    resolve_domain(settings, host)?;

    if settings.report_all_resources {
        return Ok(());
    }

    let extension = path_extension(path);
    let reported = if settings.report_extensions.is_empty() {
        CONTENT_EXTENSIONS.contains(&extension)
    } else {
        settings.report_extensions.iter().any(|ext| ext == extension)
    };

    if reported {
        Ok(())
    } else {
        Err(Ineligible::UnreportedResource(path.to_owned()))
    }
}

/// Check whether a response with `status_code` should be reported. Only 2xx and
/// 3xx are reported, plus 4xx and 5xx if errors are reported too.
pub fn check_status(settings: &Settings, status_code: u16) -> Result<(), Ineligible> {
    match status_code - status_code % 100 {
        200 | 300 => Ok(()),
        400 | 500 if settings.report_errors => Ok(()),
        _ => Err(Ineligible::UnreportedStatus(status_code)),
    }
}

/// Percent-decode the path of a request URI. Extensions are matched against the
/// decoded path, so `/logo%2Ejpg` is a `.jpg`. Invalid UTF-8 is replaced.
pub fn decode_path(path: &str) -> Cow<'_, str> {
    percent_decode_str(path).decode_utf8_lossy()
}

/// The extension of the last segment of `path`, including the dot. Empty if the
/// last segment has no dot.
pub fn path_extension(path: &str) -> &str {
    let segment = path.rsplit('/').next().unwrap_or(path);
    match segment.rfind('.') {
        Some(index) => &segment[index..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeederConfig;

    fn settings() -> Settings {
        FeederConfig::new("http://localhost/api/event", &["a.com", "b.com"])
            .normalize()
            .unwrap()
    }

    #[test]
    fn test_path_extension() {
        assert_eq!(path_extension("/"), "");
        assert_eq!(path_extension("/index.html"), ".html");
        assert_eq!(path_extension("/archive.tar.gz"), ".gz");
        assert_eq!(path_extension("/blog/post"), "");
        assert_eq!(path_extension("/v1.2/post"), "");
        assert_eq!(path_extension("/.well-known"), ".well-known");
        assert_eq!(path_extension("/trailing."), ".");
    }

    #[test]
    fn test_resolve_domain() {
        let mut settings = settings();

        assert_eq!(resolve_domain(&settings, "b.com"), Ok("b.com"));
        assert_eq!(
            resolve_domain(&settings, "c.com"),
            Err(Ineligible::UnlistedHost("c.com".to_owned()))
        );
        assert_eq!(
            resolve_domain(&settings, "a.com:8080"),
            Err(Ineligible::UnlistedHost("a.com:8080".to_owned()))
        );

        settings.report_any_host = true;
        assert_eq!(resolve_domain(&settings, "b.com"), Ok("b.com"));
        assert_eq!(resolve_domain(&settings, "c.com"), Ok("a.com"));
    }

    #[test]
    fn test_default_content_extensions() {
        let settings = settings();

        for path in [
            "/",
            "/about",
            "/index.htm",
            "/index.html",
            "/index.php",
            "/feed.rss",
            "/doc.rtf",
            "/sitemap.xml",
        ] {
            assert_eq!(check_resource(&settings, "a.com", path), Ok(()), "{path}");
        }

        for path in ["/logo.jpg", "/app.js", "/style.css", "/data.json"] {
            assert_eq!(
                check_resource(&settings, "a.com", path),
                Err(Ineligible::UnreportedResource(path.to_owned())),
                "{path}"
            );
        }
    }

    #[test]
    fn test_configured_extensions_replace_defaults() {
        let mut config = FeederConfig::new("http://localhost/api/event", &["a.com"]);
        config.report_extensions = "json".parse().unwrap();
        let settings = config.normalize().unwrap();

        assert_eq!(check_resource(&settings, "a.com", "/data.json"), Ok(()));
        assert!(check_resource(&settings, "a.com", "/index.html").is_err());
        assert!(check_resource(&settings, "a.com", "/").is_err());
        assert!(check_resource(&settings, "a.com", "/data.JSON").is_err());
    }

    #[test]
    fn test_configured_empty_extension() {
        let mut config = FeederConfig::new("http://localhost/api/event", &["a.com"]);
        config.report_extensions = "json,".parse().unwrap();
        let settings = config.normalize().unwrap();

        assert_eq!(check_resource(&settings, "a.com", "/"), Ok(()));
        assert_eq!(check_resource(&settings, "a.com", "/data.json"), Ok(()));
        assert!(check_resource(&settings, "a.com", "/index.html").is_err());
    }

    #[test]
    fn test_extension_of_encoded_path() {
        let settings = settings();
        assert_eq!(decode_path("/logo%2Ejpg"), "/logo.jpg");
        assert_eq!(decode_path("/caf%C3%A9.html"), "/café.html");
        assert_eq!(decode_path("/plain.html"), "/plain.html");

        assert_eq!(
            check_resource(&settings, "a.com", &decode_path("/logo%2Ejpg")),
            Err(Ineligible::UnreportedResource("/logo.jpg".to_owned()))
        );

        let mut config = FeederConfig::new("http://localhost/api/event", &["a.com"]);
        config.report_extensions = "html".parse().unwrap();
        let settings = config.normalize().unwrap();
        assert_eq!(
            check_resource(&settings, "a.com", &decode_path("/page%2Ehtml")),
            Ok(())
        );
    }

    #[test]
    fn test_report_all_resources() {
        let mut settings = settings();
        settings.report_all_resources = true;

        assert_eq!(check_resource(&settings, "a.com", "/logo.jpg"), Ok(()));
        assert!(check_resource(&settings, "c.com", "/logo.jpg").is_err());
    }

    #[test]
    fn test_unlisted_host() {
        let mut settings = settings();
        assert_eq!(
            check_resource(&settings, "c.com", "/"),
            Err(Ineligible::UnlistedHost("c.com".to_owned()))
        );

        settings.report_any_host = true;
        assert_eq!(check_resource(&settings, "c.com", "/"), Ok(()));
    }

    #[test]
    fn test_check_status() {
        let mut settings = settings();

        for code in [200, 204, 299, 301, 304, 399] {
            assert_eq!(check_status(&settings, code), Ok(()), "{code}");
        }
        for code in [100, 101, 199, 404, 451, 500, 503, 600, 999, 0, 42] {
            assert_eq!(
                check_status(&settings, code),
                Err(Ineligible::UnreportedStatus(code)),
                "{code}"
            );
        }

        settings.report_errors = true;
        for code in [200, 302, 404, 500, 599] {
            assert_eq!(check_status(&settings, code), Ok(()), "{code}");
        }
        for code in [101, 600, 42] {
            assert!(check_status(&settings, code).is_err(), "{code}");
        }
    }
}
