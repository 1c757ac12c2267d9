//! Ephemeral UI observations shared between drivers, the agent and the cache.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Non-negative device coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
}

/// Snapshot of the window and cursor; any field may be missing when the
/// backend could not provide it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserState {
    pub window: WindowState,
    pub cursor: CursorState,
}

impl BrowserState {
    /// One-line summary used in prompts and tool results.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(url) = &self.window.url {
            parts.push(format!("url={url}"));
        }
        if let Some(title) = &self.window.title {
            parts.push(format!("title={title:?}"));
        }
        if let Some(size) = &self.window.size {
            parts.push(format!("size={}x{}", size.width, size.height));
        }
        if let Some(pos) = &self.cursor.position {
            parts.push(format!("cursor={pos}"));
        }
        if parts.is_empty() {
            "state unavailable".to_string()
        } else {
            parts.join(" ")
        }
    }
}

/// Tag plus whitelisted attributes of one UI element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl fmt::Display for ElementDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag)?;
        for (k, v) in &self.attributes {
            write!(f, "[{k}={v:?}]")?;
        }
        Ok(())
    }
}

/// Structural description of the element at a coordinate, used to detect UI
/// drift between recording and replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub element: ElementDescriptor,
    /// Nearest ancestor first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ancestors: Vec<ElementDescriptor>,
}

impl Fingerprint {
    /// Canonical `outer > inner > element` rendering; equal renderings mean equal fingerprints.
    pub fn render(&self) -> String {
        let mut chain: Vec<String> = self.ancestors.iter().rev().map(|a| a.to_string()).collect();
        chain.push(self.element.to_string());
        chain.join(" > ")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
