//! Element fingerprints.
//!
//! A fingerprint keeps only attributes that identify an element's role and
//! survive re-renders (ids, names, labels); text, classes and styles are
//! dropped so cosmetic changes do not invalidate cached steps.
use crate::sightline_browser::backend::RawElement;
use regex::Regex;
use sightline_common::{ElementDescriptor, Fingerprint, Platform, Point};
use std::sync::OnceLock;

pub const ANCESTOR_LEVELS: usize = 2;
const MAX_VALUE_LEN: usize = 80;

const WEB_ATTRIBUTES: &[&str] = &[
    "id",
    "name",
    "type",
    "role",
    "aria-label",
    "placeholder",
    "title",
    "alt",
    "href",
    "data-testid",
];

const MOBILE_ATTRIBUTES: &[&str] = &[
    "resource-id",
    "content-desc",
    "class",
    "name",
    "label",
    "type",
];

/// Runs in the page with `(x, y)` and returns the innermost element chain.
pub const LOCATE_SCRIPT: &str = r#"
const [x, y] = arguments;
let el = document.elementFromPoint(x, y);
if (!el) return null;
const inside = (node) => {
  const r = node.getBoundingClientRect();
  return x >= r.left && x <= r.right && y >= r.top && y <= r.bottom;
};
let descended = true;
while (descended) {
  descended = false;
  for (const child of el.children) {
    if (inside(child)) { el = child; descended = true; break; }
  }
}
const describe = (node) => {
  const attributes = {};
  for (const a of node.attributes) attributes[a.name] = a.value;
  return { tag: node.tagName.toLowerCase(), attributes };
};
const chain = [describe(el)];
let parent = el.parentElement;
while (parent && chain.length < 3) {
  chain.push(describe(parent));
  parent = parent.parentElement;
}
return chain;
"#;

fn whitelist(platform: Platform) -> &'static [&'static str] {
    if platform.is_mobile() {
        MOBILE_ATTRIBUTES
    } else {
        WEB_ATTRIBUTES
    }
}

fn normalize_value(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_VALUE_LEN).collect()
}

pub fn normalize_element(raw: &RawElement, platform: Platform) -> ElementDescriptor {
    let allowed = whitelist(platform);
    let attributes = raw
        .attributes
        .iter()
        .filter(|(k, _)| allowed.contains(&k.to_ascii_lowercase().as_str()))
        .map(|(k, v)| (k.to_ascii_lowercase(), normalize_value(v)))
        .filter(|(_, v)| !v.is_empty())
        .collect();
    ElementDescriptor {
        tag: raw.tag.trim().to_ascii_lowercase(),
        attributes,
    }
}

/// Build a fingerprint from an innermost-first element chain.
pub fn fingerprint_from_chain(chain: &[RawElement], platform: Platform) -> Option<Fingerprint> {
    let (element, ancestors) = chain.split_first()?;
    Some(Fingerprint {
        element: normalize_element(element, platform),
        ancestors: ancestors
            .iter()
            .take(ANCESTOR_LEVELS)
            .map(|a| normalize_element(a, platform))
            .collect(),
    })
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    x1: i64,
    y1: i64,
    x2: i64,
    y2: i64,
}

impl Bounds {
    fn contains(&self, p: Point) -> bool {
        let (x, y) = (i64::from(p.x), i64::from(p.y));
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }

    fn area(&self) -> i64 {
        (self.x2 - self.x1).max(0) * (self.y2 - self.y1).max(0)
    }
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<(/?)([A-Za-z][\w.:-]*)((?:\s+[\w:.-]+\s*=\s*"[^"]*")*)\s*(/?)>"#)
            .expect("valid tag regex")
    })
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"([\w:.-]+)\s*=\s*"([^"]*)""#).expect("valid attribute regex"))
}

fn android_bounds_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]").expect("valid bounds regex")
    })
}

fn bounds_of(el: &RawElement) -> Option<Bounds> {
    if let Some(raw) = el.attributes.get("bounds") {
        let c = android_bounds_regex().captures(raw)?;
        let n = |i: usize| c.get(i).and_then(|m| m.as_str().parse::<i64>().ok());
        return Some(Bounds {
            x1: n(1)?,
            y1: n(2)?,
            x2: n(3)?,
            y2: n(4)?,
        });
    }
    let n = |k: &str| el.attributes.get(k).and_then(|v| v.parse::<i64>().ok());
    let (x, y, w, h) = (n("x")?, n("y")?, n("width")?, n("height")?);
    Some(Bounds {
        x1: x,
        y1: y,
        x2: x + w,
        y2: y + h,
    })
}

fn unescape(v: &str) -> String {
    v.replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Find the smallest element containing `at` in an Appium page source and
/// return it with its ancestors, nearest first.
pub fn element_at_in_source(source: &str, at: Point) -> Option<Vec<RawElement>> {
    let mut stack: Vec<RawElement> = Vec::new();
    let mut best: Option<(i64, Vec<RawElement>)> = None;

    for cap in tag_regex().captures_iter(source) {
        let closing = !cap[1].is_empty();
        let tag = cap[2].to_string();
        if closing {
            stack.pop();
            continue;
        }

        let attributes = attr_regex()
            .captures_iter(cap.get(3).map_or("", |m| m.as_str()))
            .map(|a| (a[1].to_string(), unescape(&a[2])))
            .collect();
        let el = RawElement { tag, attributes };

        if let Some(bounds) = bounds_of(&el) {
            if bounds.contains(at) && best.as_ref().map_or(true, |(area, _)| bounds.area() <= *area) {
                let mut chain = vec![el.clone()];
                chain.extend(stack.iter().rev().cloned());
                best = Some((bounds.area(), chain));
            }
        }

        if cap[4].is_empty() {
            stack.push(el);
        }
    }

    best.map(|(_, chain)| chain)
}
