//! PubMed fetcher over the NCBI E-utilities.
//!
//! # Protocol
//!
//! 1. `esearch.fcgi` returns the PMIDs matching the term (XML `IdList`)
//! 2. `efetch.fcgi` returns the full record of one PMID (XML `PubmedArticleSet`)
//!
//! Publication-type and language filters are folded into the term using the
//! `[pt]` and `[la]` field tags. The next snowball query is the comma-joined
//! list of the current step's PMIDs.

use super::search::{snowball, SearchPage, SearchProvider};
use super::{kind_mismatch, take_limit, Fetcher};
use crate::config::{ConfigProvider, PUBMED_API_KEY};
use crate::error::{IngestError, Result};
use crate::http::{HttpTransport, API_TIMEOUT};
use crate::models::{Article, FetchRequest, PubMedField, PubMedParams, SourceParams};
use crate::xml::XmlElement;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
pub const EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";
pub const ARTICLE_BASE_URL: &str = "https://pubmed.ncbi.nlm.nih.gov";

const ALL_FIELDS: &[PubMedField] = &[
    PubMedField::Authors,
    PubMedField::Journal,
    PubMedField::Grants,
    PubMedField::PublicationTypes,
    PubMedField::PublicationDate,
    PubMedField::References,
];

/// Fetcher for `pubmed` sources.
#[derive(Debug)]
pub struct PubMedFetcher<'a, H, C> {
    http: &'a H,
    config: &'a C,
}

impl<'a, H: HttpTransport, C: ConfigProvider> PubMedFetcher<'a, H, C> {
    pub fn new(http: &'a H, config: &'a C) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl<'a, H: HttpTransport, C: ConfigProvider> Fetcher for PubMedFetcher<'a, H, C> {
    fn name(&self) -> &'static str {
        "pubmed"
    }

    #[instrument(level = "info", skip_all, fields(source = %request.id))]
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<Article>> {
        let SourceParams::Pubmed(params) = &request.source else {
            return Err(kind_mismatch(self.name(), request));
        };
        let api_key = self
            .config
            .require(PUBMED_API_KEY)
            .map_err(|_| IngestError::Configuration("PubMed API key is not configured".to_string()))?;

        let provider = PubMedSearch {
            http: self.http,
            api_key,
            params,
        };
        let articles = snowball(&provider, &params.query, params.max_steps, params.per_step).await?;
        Ok(take_limit(articles, request.max_items))
    }
}

/// One PubMed search configuration, used as a snowball provider.
pub struct PubMedSearch<'a, H> {
    pub http: &'a H,
    pub api_key: String,
    pub params: &'a PubMedParams,
}

impl<'a, H: HttpTransport> PubMedSearch<'a, H> {
    /// PMIDs for `term`.
    #[instrument(level = "info", skip_all, fields(%term))]
    async fn search_ids(&self, term: &str, per_step: usize) -> Result<Vec<String>> {
        let retmax = per_step.to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("db", "pubmed"),
            ("term", term),
            ("retmax", retmax.as_str()),
            ("api_key", self.api_key.as_str()),
        ];
        if let Some(mindate) = self.params.mindate.as_deref() {
            query.push(("mindate", mindate));
        }
        if let Some(maxdate) = self.params.maxdate.as_deref() {
            query.push(("maxdate", maxdate));
        }
        if self.params.mindate.is_some() || self.params.maxdate.is_some() {
            query.push(("datetype", self.params.datetype.as_deref().unwrap_or("pdat")));
        }
        let url = Url::parse_with_params(ESEARCH_URL, &query)
            .map_err(|e| IngestError::Configuration(format!("bad esearch URL: {e}")))?;

        let response = self
            .http
            .get(url.as_str(), &[], API_TIMEOUT)
            .await?
            .error_for_status(ESEARCH_URL)?;
        let root = XmlElement::parse(&response.body)?;
        if let Some(error) = root.text_at(&["ERROR"]) {
            return Err(IngestError::Fetch(format!("PubMed search failed: {error}")));
        }
        let ids: Vec<String> = root
            .child("IdList")
            .map(|list| {
                list.children_named("Id")
                    .map(|id| id.text.trim().to_string())
                    .filter(|id| !id.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        info!(count = ids.len(), "PubMed search returned ids");
        Ok(ids)
    }

    /// Full record of one PMID.
    #[instrument(level = "debug", skip_all, fields(%pmid))]
    async fn fetch_record(&self, pmid: &str) -> Result<Article> {
        let url = Url::parse_with_params(
            EFETCH_URL,
            &[
                ("db", "pubmed"),
                ("id", pmid),
                ("retmode", "xml"),
                ("api_key", self.api_key.as_str()),
            ],
        )
        .map_err(|e| IngestError::Configuration(format!("bad efetch URL: {e}")))?;
        let response = self
            .http
            .get(url.as_str(), &[], API_TIMEOUT)
            .await?
            .error_for_status(EFETCH_URL)?;
        let root = XmlElement::parse(&response.body)?;
        parse_record(&root, pmid, &self.params.fields)
    }
}

#[async_trait]
impl<'a, H: HttpTransport> SearchProvider for PubMedSearch<'a, H> {
    fn name(&self) -> &'static str {
        "pubmed"
    }

    async fn search_step(&self, query: &str, per_step: usize) -> Result<SearchPage> {
        let term = build_term(query, &self.params.publication_types, &self.params.languages);
        let ids = self.search_ids(&term, per_step).await?;
        if ids.is_empty() {
            return Ok(SearchPage::default());
        }

        let mut articles = Vec::with_capacity(ids.len());
        for pmid in &ids {
            match self.fetch_record(pmid).await {
                Ok(article) => articles.push(article),
                Err(e) => warn!(%pmid, error = %e, "PubMed record skipped"),
            }
        }
        Ok(SearchPage {
            hits: ids.len(),
            articles,
            next_query: Some(ids.join(",")),
        })
    }
}

/// Fold publication-type and language filters into an E-utilities term.
pub fn build_term(query: &str, publication_types: &[String], languages: &[String]) -> String {
    let any_of = |values: &[String], tag: &str| -> Option<String> {
        let parts: Vec<String> = values
            .iter()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|v| format!("\"{v}\"[{tag}]"))
            .collect();
        (!parts.is_empty()).then(|| format!("({})", parts.join(" OR ")))
    };

    let filters: Vec<String> = [any_of(publication_types, "pt"), any_of(languages, "la")]
        .into_iter()
        .flatten()
        .collect();
    if filters.is_empty() {
        query.trim().to_string()
    } else {
        format!("({}) AND {}", query.trim(), filters.join(" AND "))
    }
}

/// Normalize an efetch document into an article.
pub fn parse_record(root: &XmlElement, pmid: &str, fields: &[PubMedField]) -> Result<Article> {
    let record = root
        .child("PubmedArticle")
        .ok_or_else(|| IngestError::Parse(format!("no PubmedArticle for {pmid}")))?;
    let article = record
        .path(&["MedlineCitation", "Article"])
        .ok_or_else(|| IngestError::Parse(format!("no Article element for {pmid}")))?;

    let title = article.text_at(&["ArticleTitle"]).unwrap_or_default();
    let abstract_text = article
        .child("Abstract")
        .map(|a| {
            a.children_named("AbstractText")
                .map(|section| {
                    let text = section.text.trim();
                    match section.attr("Label") {
                        Some(label) => format!("{label}: {text}"),
                        None => text.to_string(),
                    }
                })
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n")
        })
        .unwrap_or_default();
    let publication_date = article_date(article);

    let selected = if fields.is_empty() { ALL_FIELDS } else { fields };
    let mut meta = Map::new();
    for field in selected {
        let (key, value) = match field {
            PubMedField::Authors => ("authors", json!(authors(article))),
            PubMedField::Journal => ("journal", json!(article.text_at(&["Journal", "Title"]))),
            PubMedField::Grants => ("grants", json!(list_texts(article, &["GrantList"], "Grant", Some("GrantID")))),
            PubMedField::PublicationTypes => (
                "publication_types",
                json!(list_texts(article, &["PublicationTypeList"], "PublicationType", None)),
            ),
            PubMedField::PublicationDate => ("publication_date", json!(publication_date)),
            PubMedField::References => ("references", json!(references(record))),
        };
        meta.insert(key.to_string(), value);
    }
    let meta = Value::Object(meta);
    debug!(%pmid, fields = selected.len(), "Parsed PubMed record");

    let content = if abstract_text.is_empty() {
        format!("meta_data: {meta}")
    } else {
        format!("{abstract_text}\n\nmeta_data: {meta}")
    };
    let mut normalized = Article::new(&title, content).with_link(format!("{ARTICLE_BASE_URL}/{pmid}/"));
    normalized.publication_date = publication_date;
    Ok(normalized)
}

fn authors(article: &XmlElement) -> Vec<String> {
    article
        .child("AuthorList")
        .map(|list| {
            list.children_named("Author")
                .filter_map(|author| {
                    let name = [author.text_at(&["LastName"]), author.text_at(&["ForeName"])]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>()
                        .join(" ");
                    if name.is_empty() {
                        author.text_at(&["CollectiveName"])
                    } else {
                        Some(name)
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Texts of `item` children under `path`, optionally read from a sub-element.
fn list_texts(article: &XmlElement, path: &[&str], item: &str, inner: Option<&str>) -> Vec<String> {
    article
        .path(path)
        .map(|list| {
            list.children_named(item)
                .filter_map(|el| match inner {
                    Some(name) => el.text_at(&[name]),
                    None => Some(el.text.trim().to_string()).filter(|t| !t.is_empty()),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn references(record: &XmlElement) -> Vec<String> {
    record
        .path(&["PubmedData", "ReferenceList"])
        .map(|list| {
            list.children_named("Reference")
                .filter_map(|r| r.text_at(&["Citation"]))
                .collect()
        })
        .unwrap_or_default()
}

/// `ArticleDate` as `Y-M-D`, falling back to the journal issue's `PubDate`.
fn article_date(article: &XmlElement) -> Option<String> {
    let join = |date: &XmlElement| -> Option<String> {
        let parts: Vec<String> = ["Year", "Month", "Day"]
            .into_iter()
            .map_while(|part| date.text_at(&[part]))
            .collect();
        (!parts.is_empty()).then(|| parts.join("-"))
    };
    article
        .child("ArticleDate")
        .and_then(join)
        .or_else(|| {
            let pub_date = article.path(&["Journal", "JournalIssue", "PubDate"])?;
            join(pub_date).or_else(|| pub_date.text_at(&["MedlineDate"]))
        })
}
