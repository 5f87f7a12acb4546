use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;

use super::{
    JobParser, RawItem, card_fragments, company_location_from_card, is_navigation_artifact,
    is_search_link, parse_title_at_company, split_company_location,
};
use crate::models::Source;

static ANY_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

static JOB_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(senior|staff|principal|lead|junior|sr\.?|jr\.?)?\s*(software|devops|platform|infrastructure|site reliability|sre|cloud|backend|frontend|full[- ]?stack|data|ml|machine learning|security|mobile|qa|product)?\s*(engineer|developer|architect|manager|scientist|analyst|designer|specialist)\b",
    )
    .unwrap()
});

/// Fallback for company career sites and boards without a dedicated parser.
/// Only links whose text reads like a job title are considered.
pub struct GenericParser;

impl JobParser for GenericParser {
    fn source(&self) -> Source {
        Source::Generic
    }

    fn extract(&self, html: &str) -> Vec<RawItem> {
        let document = Html::parse_document(html);
        let mut items = Vec::new();

        for element in document.select(&ANY_LINK) {
            let href = element.value().attr("href").unwrap_or("");
            let text = element.text().collect::<Vec<_>>().join(" ");
            let text = text.trim();

            if text.is_empty() || is_navigation_artifact(text) || is_search_link(href) {
                continue;
            }
            // Career sites link everything; keep links that read like a role
            if !JOB_TITLE.is_match(text) {
                continue;
            }

            let (title, inline_company) = parse_title_at_company(text);
            let (inline_company, inline_location) = match inline_company {
                Some(c) => {
                    let (company, location) = split_company_location(&c);
                    (Some(company), location)
                }
                None => (None, None),
            };

            let fragments = card_fragments(element);
            let (card_company, card_location) = company_location_from_card(&fragments, &title);

            items.push(RawItem {
                title: Some(title),
                company: inline_company.or(card_company),
                location: inline_location.or(card_location),
                url: Some(href.to_string()),
                raw_text: if fragments.is_empty() {
                    text.to_string()
                } else {
                    fragments.join(" | ")
                },
            });
        }

        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_generic_picks_job_links_only() {
        let html = r#"
            <html><body>
              <p>New roles matching your profile:</p>
              <ul>
                <li><a href="https://boards.greenhouse.io/acme/jobs/42?gh_src=mail">Senior Backend Engineer at Acme - Remote</a></li>
                <li><a href="https://careers.example.com/about">About our company culture</a></li>
                <li><a href="https://careers.example.com/unsubscribe">Unsubscribe from these emails</a></li>
              </ul>
            </body></html>
        "#;

        let batch = GenericParser.parse(html, Utc::now());
        assert_eq!(batch.drafts.len(), 1);
        let draft = &batch.drafts[0];
        assert_eq!(draft.title, "Senior Backend Engineer");
        assert_eq!(draft.company, "Acme");
        assert_eq!(draft.location, "Remote");
        assert_eq!(draft.url, "https://boards.greenhouse.io/acme/jobs/42");
        assert_eq!(draft.source, Source::Generic);
    }

    #[test]
    fn test_generic_handles_non_ascii_titles() {
        let html = r#"
            <html><body><ul>
              <li><a href="https://jobs.example.com/ist/1">İstanbul Engineer at Émile Corp - Remote</a></li>
              <li><a href="https://jobs.example.com/ber/2">Platform Engineer at Globex - Berlin</a></li>
            </ul></body></html>
        "#;

        let batch = GenericParser.parse(html, Utc::now());
        assert_eq!(batch.drafts.len(), 2);
        assert_eq!(batch.drafts[0].title, "İstanbul Engineer");
        assert_eq!(batch.drafts[0].company, "Émile Corp");
        assert_eq!(batch.drafts[0].location, "Remote");
    }

    #[test]
    fn test_job_title_pattern() {
        assert!(JOB_TITLE.is_match("Staff Site Reliability Engineer"));
        assert!(JOB_TITLE.is_match("Data Scientist II"));
        assert!(!JOB_TITLE.is_match("About our company culture"));
    }
}
