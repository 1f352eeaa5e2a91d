//! Paginated list envelope: `{count, next, previous, results}`.

use axum::http::Uri;
use serde::Serialize;

use crate::db::Page;

#[derive(Debug, Serialize)]
pub struct PageBody<T> {
    pub count: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> PageBody<T> {
    /// Wrap `page`, linking neighbours relative to the request `uri`.
    pub fn new<U>(page: Page<U>, uri: &Uri, render: impl FnMut(U) -> T) -> Self {
        let next = page.has_next().then(|| page_link(uri, page.page + 1));
        let previous = page.has_previous().then(|| page_link(uri, page.page - 1));
        let count = page.total;
        Self {
            count,
            next,
            previous,
            results: page.items.into_iter().map(render).collect(),
        }
    }
}

/// The request path and query with `page` replaced. Page 1 drops the parameter.
pub fn page_link(uri: &Uri, page: i64) -> String {
    let mut pairs: Vec<String> = uri
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| pair.split('=').next() != Some("page"))
        .map(str::to_string)
        .collect();
    if page > 1 {
        pairs.push(format!("page={}", page));
    }

    if pairs.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{}", uri.path(), pairs.join("&"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_keep_other_parameters() {
        let uri: Uri = "/api/tasks?status=todo&page=2&search=ship%20it".parse().unwrap();
        assert_eq!(page_link(&uri, 3), "/api/tasks?status=todo&search=ship%20it&page=3");
        assert_eq!(page_link(&uri, 1), "/api/tasks?status=todo&search=ship%20it");
    }

    #[test]
    fn first_page_without_query_is_the_bare_path() {
        let uri: Uri = "/api/projects?page=2".parse().unwrap();
        assert_eq!(page_link(&uri, 1), "/api/projects");
    }

    #[test]
    fn envelope_links() {
        let uri: Uri = "/api/tasks?page=2&page_size=1".parse().unwrap();
        let page = Page {
            items: vec![5],
            total: 3,
            page: 2,
            page_size: 1,
        };
        let body = PageBody::new(page, &uri, |n| n * 10);
        assert_eq!(body.count, 3);
        assert_eq!(body.results, vec![50]);
        assert_eq!(body.next.as_deref(), Some("/api/tasks?page_size=1&page=3"));
        assert_eq!(body.previous.as_deref(), Some("/api/tasks?page_size=1"));
    }
}
