//! Request classification and the strategy each class gets.

use serde::Deserialize;
use url::Url;

/// Kind of resource a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
  /// Server API calls. Never cached.
  Api,
  /// Lesson video and audio.
  Media,
  /// Pages, scripts, styles, images.
  Generic,
}

/// How a class is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  Bypass,
  CacheFirst,
  NetworkFirst,
}

impl ResourceClass {
  pub fn strategy(self) -> Strategy {
    match self {
      ResourceClass::Api => Strategy::Bypass,
      ResourceClass::Media => Strategy::CacheFirst,
      ResourceClass::Generic => Strategy::NetworkFirst,
    }
  }
}

/// Patterns deciding the class of a URL.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierRules {
  /// Path prefixes routed to the API (e.g. "/api/")
  pub api_prefixes: Vec<String>,
  /// File extensions treated as media, without the dot (case-insensitive)
  pub media_extensions: Vec<String>,
  /// Host suffixes whose every resource is media (e.g. a CDN pull zone)
  pub media_hosts: Vec<String>,
}

impl Default for ClassifierRules {
  fn default() -> Self {
    Self {
      api_prefixes: vec!["/api/".to_string()],
      media_extensions: ["mp4", "webm", "m4v", "mov", "m3u8", "ts", "mp3", "m4a", "ogg", "wav"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
      media_hosts: Vec::new(),
    }
  }
}

impl ClassifierRules {
  pub fn classify(&self, url: &Url) -> ResourceClass {
    let path = url.path();

    if self.api_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
      return ResourceClass::Api;
    }

    if let Some(host) = url.host_str() {
      let host = host.to_lowercase();
      if self
        .media_hosts
        .iter()
        .any(|suffix| host == *suffix || host.ends_with(&format!(".{}", suffix)))
      {
        return ResourceClass::Media;
      }
    }

    let extension = path
      .rsplit('/')
      .next()
      .and_then(|segment| segment.rsplit_once('.'))
      .map(|(_, ext)| ext.to_lowercase());
    if let Some(ext) = extension {
      if self.media_extensions.iter().any(|m| m.eq_ignore_ascii_case(&ext)) {
        return ResourceClass::Media;
      }
    }

    ResourceClass::Generic
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classify(url: &str) -> ResourceClass {
    ClassifierRules::default().classify(&Url::parse(url).unwrap())
  }

  #[test]
  fn test_api_paths_bypass() {
    assert_eq!(classify("https://school.test/api/courses"), ResourceClass::Api);
    assert_eq!(ResourceClass::Api.strategy(), Strategy::Bypass);
  }

  #[test]
  fn test_media_by_extension() {
    assert_eq!(classify("https://school.test/v/lesson.MP4"), ResourceClass::Media);
    assert_eq!(classify("https://school.test/v/lesson.mp4?t=10"), ResourceClass::Media);
    assert_eq!(ResourceClass::Media.strategy(), Strategy::CacheFirst);
  }

  #[test]
  fn test_media_by_host() {
    let rules = ClassifierRules {
      media_hosts: vec!["cdn.school.test".into()],
      ..ClassifierRules::default()
    };
    let url = Url::parse("https://eu.cdn.school.test/asset/123").unwrap();
    assert_eq!(rules.classify(&url), ResourceClass::Media);
  }

  #[test]
  fn test_everything_else_is_generic() {
    assert_eq!(classify("https://school.test/dashboard"), ResourceClass::Generic);
    assert_eq!(classify("https://school.test/app.js"), ResourceClass::Generic);
    assert_eq!(classify("https://school.test/"), ResourceClass::Generic);
  }
}
