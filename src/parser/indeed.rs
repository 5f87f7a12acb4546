use scraper::{Html, Selector};
use std::sync::LazyLock;

use super::{
    JobParser, RawItem, card_fragments, company_location_from_card, is_navigation_artifact,
    is_search_link, parse_title_at_company,
};
use crate::models::Source;

static JOB_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='indeed.com']").unwrap());

pub struct IndeedParser;

impl JobParser for IndeedParser {
    fn source(&self) -> Source {
        Source::Indeed
    }

    fn url_allow_list(&self) -> &'static [&'static str] {
        &["jk", "vjk"]
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
            // Header and footer links also point at indeed.com; only these open a posting
            if !(href.contains("/viewjob") || href.contains("/rc/clk") || href.contains("jk=")) {
                continue;
            }

            let (title, inline_company) = parse_title_at_company(text);
            let fragments = card_fragments(element);
            let (card_company, location) = company_location_from_card(&fragments, &title);

            let raw_text = if fragments.is_empty() {
                text.to_string()
            } else {
                fragments.join(" | ")
            };

            items.push(RawItem {
                title: Some(title),
                company: inline_company.or(card_company),
                location,
                url: Some(href.to_string()),
                raw_text,
            });
        }

        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const ALERT: &str = r#"
        <html><body>
          <table>
            <tr><td>
              <a href="https://www.indeed.com/rc/clk?jk=abc123&tk=999&from=ja">Senior Rust Engineer</a>
              <div>Acme Corp</div>
              <div>Seattle, WA</div>
              <div>$150,000 - $180,000 a year</div>
            </td></tr>
            <tr><td>
              <a href="https://www.indeed.com/viewjob?jk=def456&from=ja">Backend Developer</a>
              <div>Globex - Remote</div>
            </td></tr>
            <tr><td>
              <a href="https://www.indeed.com/jobs/search?q=rust">Rust Developer jobs</a>
            </td></tr>
          </table>
        </body></html>
    "#;

    #[test]
    fn test_extract_indeed_cards() {
        let batch = IndeedParser.parse(ALERT, Utc::now());
        assert_eq!(batch.drafts.len(), 2);

        let first = &batch.drafts[0];
        assert_eq!(first.title, "Senior Rust Engineer");
        assert_eq!(first.company, "Acme Corp");
        assert_eq!(first.location, "Seattle, WA");
        assert_eq!(first.url, "https://www.indeed.com/rc/clk?jk=abc123");
        assert!(first.raw_text.contains("$150,000"));

        let second = &batch.drafts[1];
        assert_eq!(second.company, "Globex");
        assert_eq!(second.location, "Remote");
        assert_eq!(second.url, "https://www.indeed.com/viewjob?jk=def456");
    }

    #[test]
    fn test_card_without_location_is_an_item_error() {
        let html = r#"
            <p><a href="https://www.indeed.com/viewjob?jk=zzz">Staff Platform Engineer</a></p>
        "#;
        let batch = IndeedParser.parse(html, Utc::now());
        assert!(batch.drafts.is_empty());
        assert_eq!(batch.item_errors, 1);
    }
}
