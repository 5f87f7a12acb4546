use scraper::{Html, Selector};
use std::sync::LazyLock;

use super::{
    JobParser, RawItem, card_fragments, company_location_from_card, is_navigation_artifact,
    is_search_link,
};
use crate::models::Source;

static JOB_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='glassdoor.com']").unwrap());

pub struct GlassdoorParser;

impl JobParser for GlassdoorParser {
    fn source(&self) -> Source {
        Source::Glassdoor
    }

    fn url_allow_list(&self) -> &'static [&'static str] {
        &["jobListingId", "jl"]
    }

    fn extract(&self, html: &str) -> Vec<RawItem> {
        let document = Html::parse_document(html);
        let mut items = Vec::new();

        for element in document.select(&JOB_LINK) {
            let href = element.value().attr("href").unwrap_or("");
            let title = element.text().collect::<Vec<_>>().join(" ");
            let title = title.trim();

            if title.is_empty() || is_navigation_artifact(title) || is_search_link(href) {
                continue;
            }
            // Company review and salary links share the host
            if !(href.contains("/job-listing") || href.contains("jobListingId=") || href.contains("jl=")) {
                continue;
            }

            let fragments = card_fragments(element);
            // Older alert templates use the LinkedIn-like order
            let (company, location) = company_above_title(&fragments, title)
                .unwrap_or_else(|| company_location_from_card(&fragments, title));

            items.push(RawItem {
                title: Some(title.to_string()),
                company,
                location,
                url: Some(href.to_string()),
                raw_text: fragments.join(" | "),
            });
        }

        items
    }
}

/// Glassdoor cards put the employer above the title and the location below.
fn company_above_title(fragments: &[String], title: &str) -> Option<(Option<String>, Option<String>)> {
    let pos = fragments.iter().position(|f| f == title)?;
    let company = fragments[..pos]
        .iter()
        .rev()
        .find(|f| !is_rating(f))?
        .clone();
    let location = fragments.get(pos + 1).filter(|f| !f.starts_with('$')).cloned();
    Some((Some(company), location))
}

fn is_rating(fragment: &str) -> bool {
    let trimmed = fragment.trim_end_matches(['★', ' ']);
    trimmed.parse::<f32>().is_ok()
}
