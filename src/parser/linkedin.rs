use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;

use super::{
    JobParser, RawItem, card_fragments, company_location_from_card, is_navigation_artifact,
    is_search_link, parse_title_at_company,
};
use crate::models::Source;

// Alert emails link through /comm/jobs; forwarded ones use the public /jobs/view
static JOB_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='linkedin.com/comm/jobs'], a[href*='linkedin.com/jobs/view']").unwrap());

static WIDE_GAP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());

pub struct LinkedinParser;

impl JobParser for LinkedinParser {
    fn source(&self) -> Source {
        Source::Linkedin
    }

    fn extract(&self, html: &str) -> Vec<RawItem> {
        let document = Html::parse_document(html);
        let mut items = Vec::new();

        for element in document.select(&JOB_LINK) {
            let href = element.value().attr("href").unwrap_or("");
            let text = element.text().collect::<Vec<_>>().join(" ");
            let text = text.trim();

            if text.is_empty() || is_navigation_artifact(text) || is_search_link(href) {
                continue;
            }

            // Try the full card layout first, then "Title at Company" plus the card
            let (title, company, location) =
                if let Some((t, c, l)) = parse_title_company_location(text) {
                    (t, Some(c), Some(l))
                } else {
                    let (t, c) = parse_title_at_company(text);
                    let fragments = card_fragments(element);
                    let (card_company, card_location) = company_location_from_card(&fragments, &t);
                    (t, c.or(card_company), card_location)
                };

            items.push(RawItem {
                title: Some(title),
                company,
                location,
                url: Some(href.to_string()),
                raw_text: text.to_string(),
            });
        }

        items
    }
}

/// LinkedIn card text: "Title             Company · Location".
///
/// A run of two or more spaces separates title from company, the middot
/// separates company from location.
fn parse_title_company_location(text: &str) -> Option<(String, String, String)> {
    let text = text.trim();
    let middot_idx = text.find('·')?;
    let before = text[..middot_idx].trim();
    let location = text[middot_idx + '·'.len_utf8()..].trim().to_string();

    // Last wide gap, since titles sometimes contain a double space themselves
    let gap = WIDE_GAP.find_iter(before).last()?;
    let title = before[..gap.start()].trim().to_string();
    let company = before[gap.end()..].trim().to_string();

    if title.is_empty() || company.is_empty() || location.is_empty() {
        return None;
    }
    Some((title, company, location))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_parse_title_company_location() {
        let cases = [
            (
                "Staff DevOps Engineer, DevInfra             SandboxAQ · United States (Remote)",
                "Staff DevOps Engineer, DevInfra",
                "SandboxAQ",
                "United States (Remote)",
            ),
            (
                "Senior Platform Engineer             Sully.ai · Mountain View, CA (Remote)",
                "Senior Platform Engineer",
                "Sully.ai",
                "Mountain View, CA (Remote)",
            ),
            (
                "Staff Engineer - Platform             Grow Therapy · New York, NY (Remote)",
                "Staff Engineer - Platform",
                "Grow Therapy",
                "New York, NY (Remote)",
            ),
        ];
        for (input, title, company, location) in cases {
            let (t, c, l) = parse_title_company_location(input).unwrap();
            assert_eq!(t, title);
            assert_eq!(c, company);
            assert_eq!(l, location);
        }
    }

    #[test]
    fn test_parse_title_company_location_requires_middot_and_gap() {
        assert!(parse_title_company_location("Senior Engineer at Google").is_none());
        assert!(parse_title_company_location("Senior Engineer Company · Location").is_none());
    }

    #[test]
    fn test_extract_job_cards_and_skip_navigation() {
        let html = r#"
            <html><body>
              <a href="https://www.linkedin.com/comm/jobs/view/111/?trackingId=abc">
                Senior Backend Engineer    Acme · Remote
              </a>
              <a href="https://www.linkedin.com/comm/jobs/search?keywords=rust">See all jobs</a>
              <a href="https://www.linkedin.com/comm/jobs/alerts">Manage job alerts</a>
              <a href="https://www.linkedin.com/comm/jobs/view/222/">
                Platform Engineer    Globex · Seattle, WA (Hybrid)
              </a>
            </body></html>
        "#;

        let batch = LinkedinParser.parse(html, Utc::now());
        assert_eq!(batch.drafts.len(), 2);
        assert_eq!(batch.item_errors, 0);

        let first = &batch.drafts[0];
        assert_eq!(first.title, "Senior Backend Engineer");
        assert_eq!(first.company, "Acme");
        assert_eq!(first.location, "Remote");
        assert_eq!(first.url, "https://www.linkedin.com/comm/jobs/view/111");
        assert_eq!(first.source, Source::Linkedin);
    }

    #[test]
    fn test_extract_from_table_card() {
        let html = r#"
            <table><tr><td>
              <a href="https://www.linkedin.com/comm/jobs/view/333/">Principal Data Engineer</a>
              <p>Initech · Austin, TX</p>
              <p>Actively recruiting</p>
            </td></tr></table>
        "#;

        let batch = LinkedinParser.parse(html, Utc::now());
        assert_eq!(batch.drafts.len(), 1);
        assert_eq!(batch.drafts[0].company, "Initech");
        assert_eq!(batch.drafts[0].location, "Austin, TX");
    }

    #[test]
    fn test_duplicate_cards_collapse() {
        let card = r#"<a href="https://www.linkedin.com/comm/jobs/view/111/">Senior Backend Engineer    Acme · Remote</a>"#;
        let html = format!("<html><body>{card}{card}</body></html>");
        assert_eq!(LinkedinParser.parse(&html, Utc::now()).drafts.len(), 1);
    }
}
