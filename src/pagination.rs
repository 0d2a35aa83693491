//! Draining server-side paginated listings.
//!
//! Listing endpoints return results one page at a time, together with an
//! opaque continuation token naming the next page. `fetch_all` turns that
//! protocol into a lazy iterator over items, so callers never manage
//! tokens themselves. `ListRequest` binds the loop to an
//! `AuthorizedTransport` and the YouTube-style wire shape
//! (`pageToken`/`maxResults` parameters, `items`/`nextPageToken` fields).

use std::collections::VecDeque;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::authenticator::AuthorizedTransport;
use crate::error::Error;

/// The largest page size the listing endpoints document.
pub const MAX_PAGE_SIZE: u32 = 50;

/// One page of a listing: the items in server-returned order, plus the
/// continuation token for the following page. A token of `None` (or an
/// empty string, which some endpoints send) signals the end of the
/// sequence. The token is opaque and must be threaded into the next
/// request unchanged.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// The page's items, in server-returned order.
    pub items: Vec<T>,
    /// Continuation token for the following page, if any.
    pub next_page_token: Option<String>,
}

enum NextRequest {
    /// Before the first request, issued without a continuation token.
    Initial,
    /// The token to thread into the next request.
    Token(String),
    /// The server signalled the end of the sequence, or an error aborted
    /// the fetch.
    Exhausted,
}

impl NextRequest {
    fn from_page_token(token: Option<String>) -> NextRequest {
        match token {
            Some(t) if !t.is_empty() => NextRequest::Token(t),
            _ => NextRequest::Exhausted,
        }
    }
}

/// Drains a paginated listing into a lazy sequence of items.
///
/// `fetch` is called with the continuation token of the previous response
/// (`None` for the first request) and the page size bound; every item of a
/// page is yielded before the next page is requested. The sequence is
/// finite and non-restartable; pagination is not snapshot-isolated, so a
/// fresh call may observe different server-side data.
///
/// `page_size` must lie within `1..=MAX_PAGE_SIZE`.
pub fn fetch_all<T, F>(fetch: F, page_size: u32) -> Result<PageIter<T, F>, Error>
where
    F: FnMut(Option<&str>, u32) -> Result<Page<T>, Error>,
{
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(Error::UserError(format!(
            "page size must be between 1 and {}, got {}",
            MAX_PAGE_SIZE, page_size
        )));
    }
    Ok(PageIter {
        fetch,
        page_size,
        buffered: VecDeque::new(),
        next_request: NextRequest::Initial,
    })
}

/// Iterator over the items of a paginated listing, as returned by
/// [`fetch_all`]. Yields `Err` exactly once if a page request fails, and
/// nothing afterwards; no partial-page retry is attempted.
pub struct PageIter<T, F> {
    fetch: F,
    page_size: u32,
    buffered: VecDeque<T>,
    next_request: NextRequest,
}

impl<T, F> Iterator for PageIter<T, F>
where
    F: FnMut(Option<&str>, u32) -> Result<Page<T>, Error>,
{
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffered.pop_front() {
                return Some(Ok(item));
            }
            let token = match std::mem::replace(&mut self.next_request, NextRequest::Exhausted) {
                NextRequest::Exhausted => return None,
                NextRequest::Initial => None,
                NextRequest::Token(t) => Some(t),
            };
            match (self.fetch)(token.as_deref(), self.page_size) {
                Ok(page) => {
                    log::debug!(
                        "fetched page with {} items, more: {}",
                        page.items.len(),
                        page.next_page_token.is_some()
                    );
                    self.next_request = NextRequest::from_page_token(page.next_page_token);
                    self.buffered = page.items.into();
                    // An empty page with a token means we keep going.
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// The wire shape of a listing endpoint's response.
#[derive(Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// A listing request template: endpoint URL plus fixed query parameters,
/// with the continuation-token slot filled in by the fetch loop.
///
/// ```no_run
/// # fn run(transport: &tubekit::AuthorizedTransport) -> Result<(), tubekit::Error> {
/// let uploads = tubekit::ListRequest::new(
///     transport,
///     "https://www.googleapis.com/youtube/v3/playlistItems",
/// )
/// .param("part", "snippet")
/// .param("playlistId", "UUxxxx");
/// for item in uploads.items::<serde_json::Value>(50)? {
///     let item = item?;
///     println!("{} ({})", item["snippet"]["title"], item["snippet"]["resourceId"]["videoId"]);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ListRequest<'a> {
    transport: &'a AuthorizedTransport,
    url: String,
    params: Vec<(String, String)>,
}

impl<'a> ListRequest<'a> {
    /// Creates a request template for the listing endpoint at `url`.
    pub fn new(transport: &'a AuthorizedTransport, url: impl Into<String>) -> ListRequest<'a> {
        ListRequest {
            transport,
            url: url.into(),
            params: Vec::new(),
        }
    }

    /// Adds a fixed query parameter, e.g. `part=snippet`.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> ListRequest<'a> {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Fetches a single page.
    pub fn fetch_page<T>(&self, page_token: Option<&str>, page_size: u32) -> Result<Page<T>, Error>
    where
        T: DeserializeOwned,
    {
        let page_size_param = page_size.to_string();
        let mut params: Vec<(&str, &str)> = self
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        params.push(("maxResults", page_size_param.as_str()));
        // The first request carries an empty token, as the listing
        // endpoints expect.
        params.push(("pageToken", page_token.unwrap_or("")));
        let body = self.transport.get(&self.url, &params)?;
        let resp: ListResponse<T> = serde_json::from_value(body)?;
        Ok(Page {
            items: resp.items,
            next_page_token: resp.next_page_token,
        })
    }

    /// Drains the listing into a lazy sequence of items.
    pub fn items<T>(
        self,
        page_size: u32,
    ) -> Result<PageIter<T, impl FnMut(Option<&str>, u32) -> Result<Page<T>, Error> + 'a>, Error>
    where
        T: DeserializeOwned + 'a,
    {
        fetch_all(move |token, size| self.fetch_page(token, size), page_size)
    }
}
