// src/content.rs
// Publishable content kept in one `content` table, split by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

pub const CONTENT: &str = "content";

const WORDS_PER_MINUTE: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    News,
    Story,
    Testimonial,
    Program,
    Outreach,
    Gallery,
}

impl ContentType {
    pub const ALL: [ContentType; 6] = [
        ContentType::News,
        ContentType::Story,
        ContentType::Testimonial,
        ContentType::Program,
        ContentType::Outreach,
        ContentType::Gallery,
    ];

    /// Value of the `type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::News => "news",
            ContentType::Story => "story",
            ContentType::Testimonial => "testimonial",
            ContentType::Program => "program",
            ContentType::Outreach => "outreach",
            ContentType::Gallery => "gallery",
        }
    }

    /// Path segment under `/api`.
    pub fn route_segment(&self) -> &'static str {
        match self {
            ContentType::News => "news",
            ContentType::Story => "stories",
            ContentType::Testimonial => "testimonials",
            ContentType::Program => "programs",
            ContentType::Outreach => "outreaches",
            ContentType::Gallery => "gallery",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s || t.route_segment() == s)
            .ok_or_else(|| format!("Unknown content type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    #[default]
    Draft,
    Published,
    Scheduled,
    Archived,
}

/// One row of the `content` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ContentType,
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub status: ContentStatus,
    #[serde(default)]
    pub publish_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub details: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TYPE-SPECIFIC DETAILS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NewsDetails {
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StoryDetails {
    #[serde(default)]
    pub quote: Option<String>,
    #[serde(default)]
    pub beneficiary: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TestimonialDetails {
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub rating: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProgramDetails {
    #[serde(default)]
    pub goal: Option<f64>,
    #[serde(default)]
    pub raised: Option<f64>,
    #[serde(default)]
    pub beneficiaries: Option<u32>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OutreachDetails {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub participants: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GalleryImage {
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GalleryDetails {
    #[serde(default)]
    pub images: Vec<GalleryImage>,
}

/// The `details` payload, typed by content type.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentDetails {
    News(NewsDetails),
    Story(StoryDetails),
    Testimonial(TestimonialDetails),
    Program(ProgramDetails),
    Outreach(OutreachDetails),
    Gallery(GalleryDetails),
}

impl ContentDetails {
    /// Strict parse used on writes. `null` is an empty payload.
    pub fn parse(kind: ContentType, raw: &Value) -> Result<Self, serde_json::Error> {
        let raw = if raw.is_null() { json!({}) } else { raw.clone() };
        Ok(match kind {
            ContentType::News => ContentDetails::News(serde_json::from_value(raw)?),
            ContentType::Story => {
                // Older rows nest the story fields under `story_details`.
                let inner = match raw.get("story_details") {
                    Some(nested) if nested.is_object() => nested.clone(),
                    _ => raw,
                };
                ContentDetails::Story(serde_json::from_value(inner)?)
            }
            ContentType::Testimonial => ContentDetails::Testimonial(serde_json::from_value(raw)?),
            ContentType::Program => ContentDetails::Program(serde_json::from_value(raw)?),
            ContentType::Outreach => ContentDetails::Outreach(serde_json::from_value(raw)?),
            ContentType::Gallery => ContentDetails::Gallery(serde_json::from_value(raw)?),
        })
    }

    /// Lenient parse used on reads: a malformed payload becomes the default.
    pub fn parse_or_default(kind: ContentType, raw: &Value) -> Self {
        Self::parse(kind, raw).unwrap_or_else(|e| {
            tracing::warn!("[CONTENT] Ignoring malformed {} details: {}", kind, e);
            Self::empty(kind)
        })
    }

    pub fn empty(kind: ContentType) -> Self {
        match kind {
            ContentType::News => ContentDetails::News(Default::default()),
            ContentType::Story => ContentDetails::Story(Default::default()),
            ContentType::Testimonial => ContentDetails::Testimonial(Default::default()),
            ContentType::Program => ContentDetails::Program(Default::default()),
            ContentType::Outreach => ContentDetails::Outreach(Default::default()),
            ContentType::Gallery => ContentDetails::Gallery(Default::default()),
        }
    }

    pub fn to_value(&self) -> Value {
        let value = match self {
            ContentDetails::News(d) => serde_json::to_value(d),
            ContentDetails::Story(d) => serde_json::to_value(d),
            ContentDetails::Testimonial(d) => serde_json::to_value(d),
            ContentDetails::Program(d) => serde_json::to_value(d),
            ContentDetails::Outreach(d) => serde_json::to_value(d),
            ContentDetails::Gallery(d) => serde_json::to_value(d),
        };
        value.unwrap_or_else(|_| json!({}))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSFORMS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lowercase ASCII, every run of other characters collapsed to one hyphen,
/// no leading or trailing hyphen.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

/// Minutes to read `text`, never less than one.
pub fn read_time(text: &str) -> usize {
    let words = text.split_whitespace().count();
    words.div_ceil(WORDS_PER_MINUTE).max(1)
}

/// Percentage of `goal` reached, capped at 100.
pub fn progress(goal: Option<f64>, raised: Option<f64>) -> u32 {
    match (goal, raised) {
        (Some(goal), Some(raised)) if goal > 0.0 && raised > 0.0 => {
            ((raised / goal) * 100.0).round().min(100.0) as u32
        }
        _ => 0,
    }
}

/// Public JSON shape of an item: the stored fields plus the type's extras.
pub fn to_view(item: &ContentItem) -> Value {
    let mut view = serde_json::to_value(item).unwrap_or_else(|_| json!({}));
    let extras = match ContentDetails::parse_or_default(item.kind, &item.details) {
        ContentDetails::News(details) => json!({
            "readTime": read_time(item.content.as_deref().unwrap_or_default()),
            "category": details.category,
        }),
        ContentDetails::Story(details) => json!({
            "quote": details.quote,
            "beneficiary": details.beneficiary,
            "location": details.location,
        }),
        ContentDetails::Testimonial(details) => json!({
            "author": details.author_name.or_else(|| item.author.clone()),
            "role": details.role,
            "rating": details.rating.map(|r| r.clamp(1, 5)),
        }),
        ContentDetails::Program(details) => json!({
            "goal": details.goal,
            "raised": details.raised,
            "progress": progress(details.goal, details.raised),
            "beneficiaries": details.beneficiaries,
        }),
        ContentDetails::Outreach(details) => json!({
            "location": details.location,
            "date": details.date,
            "participants": details.participants,
        }),
        ContentDetails::Gallery(details) => json!({ "images": details.images }),
    };

    if let (Some(view), Value::Object(extras)) = (view.as_object_mut(), extras) {
        view.extend(extras);
    }
    view
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(kind: ContentType, content: &str, details: Value) -> ContentItem {
        ContentItem {
            id: "c-1".into(),
            kind,
            title: "Title".into(),
            slug: "title".into(),
            excerpt: None,
            content: Some(content.into()),
            image_url: None,
            author: Some("Staff".into()),
            status: ContentStatus::Published,
            publish_date: None,
            featured: false,
            tags: vec![],
            details,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn slugify_collapses_and_trims() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  --Clean  Water 2024--  "), "clean-water-2024");
        assert_eq!(slugify(&slugify("Hello, World!")), "hello-world");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn read_time_rounds_up_with_minimum_one() {
        assert_eq!(read_time(""), 1);
        assert_eq!(read_time(&"word ".repeat(200)), 1);
        assert_eq!(read_time(&"word ".repeat(201)), 2);
    }

    #[test]
    fn program_progress_is_capped() {
        assert_eq!(progress(Some(1000.0), Some(250.0)), 25);
        assert_eq!(progress(Some(100.0), Some(250.0)), 100);
        assert_eq!(progress(None, Some(5.0)), 0);
        assert_eq!(progress(Some(0.0), Some(5.0)), 0);
    }

    #[test]
    fn story_quote_read_from_nested_details() {
        let view = to_view(&item(
            ContentType::Story,
            "",
            json!({ "story_details": { "quote": "It changed my life" } }),
        ));
        assert_eq!(view["quote"], "It changed my life");
        assert_eq!(view["type"], "story");
    }

    #[test]
    fn news_view_has_read_time() {
        let view = to_view(&item(ContentType::News, &"w ".repeat(450), Value::Null));
        assert_eq!(view["readTime"], 3);
    }

    #[test]
    fn strict_parse_rejects_wrong_shapes() {
        assert!(ContentDetails::parse(ContentType::Program, &json!({ "goal": "lots" })).is_err());
        assert_eq!(
            ContentDetails::parse_or_default(ContentType::Program, &json!({ "goal": "lots" })),
            ContentDetails::empty(ContentType::Program)
        );
    }

    #[test]
    fn content_type_parses_route_and_column_names() {
        assert_eq!("stories".parse::<ContentType>().unwrap(), ContentType::Story);
        assert_eq!("story".parse::<ContentType>().unwrap(), ContentType::Story);
        assert!("events".parse::<ContentType>().is_err());
    }
}
