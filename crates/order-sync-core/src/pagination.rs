//! Page cursors and the rules that end an incremental fetch.
//!
//! Grubhub pages by page number and reports a pager; DoorDash pages by
//! offset and reports nothing but the records. Both share the same stop
//! rules, evaluated in this order after every page:
//!
//! 1. the page held no records,
//! 2. none of the page's records were new,
//! 3. the page held fewer records than requested,
//! 4. the pager says this was the last page.
//!
//! Cursors live for one cycle only. Every cycle starts again at the first
//! page and leans on id dedup to stop early.

use serde::{Deserialize, Serialize};

use crate::models::Site;

/// Position of the next page to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCursor {
    /// 1-based page number addressing (Grubhub).
    Page {
        page_number: u32,
        page_size: u32,
        total_pages: Option<u32>,
    },
    /// Offset/limit addressing (DoorDash).
    Offset { offset: u32, limit: u32 },
}

impl PageCursor {
    /// Cursor for the first page of a cycle on `site`.
    pub fn first(site: Site, page_size: u32) -> Self {
        match site {
            Site::Grubhub => PageCursor::Page {
                page_number: 1,
                page_size,
                total_pages: None,
            },
            Site::DoorDash => PageCursor::Offset {
                offset: 0,
                limit: page_size,
            },
        }
    }

    pub fn page_size(&self) -> u32 {
        match self {
            PageCursor::Page { page_size, .. } => *page_size,
            PageCursor::Offset { limit, .. } => *limit,
        }
    }
}

/// Pager block of a page-number listing response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pager {
    pub current_page: u32,
    pub total_pages: u32,
}

/// One page of raw records as returned by a site.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub records: Vec<serde_json::Value>,
    pub pager: Option<Pager>,
}

/// Why a fetch stopped paginating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EmptyPage,
    NoNewRecords,
    ShortPage,
    LastPage,
}

/// What to do after a page has been filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue(PageCursor),
    Stop(StopReason),
}

/// Decides whether to request another page.
///
/// `received` is the number of records on the page, `fresh` the number
/// left after dropping already-known ids.
pub fn next_step(cursor: &PageCursor, received: usize, fresh: usize, pager: Option<&Pager>) -> Step {
    if received == 0 {
        return Step::Stop(StopReason::EmptyPage);
    }
    if fresh == 0 {
        return Step::Stop(StopReason::NoNewRecords);
    }
    if received < cursor.page_size() as usize {
        return Step::Stop(StopReason::ShortPage);
    }

    match *cursor {
        PageCursor::Page {
            page_number,
            page_size,
            total_pages,
        } => {
            let (current, total) = match pager {
                Some(p) => (p.current_page, Some(p.total_pages)),
                None => (page_number, total_pages),
            };
            if let Some(total) = total {
                if current >= total {
                    return Step::Stop(StopReason::LastPage);
                }
            }
            Step::Continue(PageCursor::Page {
                page_number: current + 1,
                page_size,
                total_pages: total,
            })
        }
        PageCursor::Offset { offset, limit } => Step::Continue(PageCursor::Offset {
            offset: offset + limit,
            limit,
        }),
    }
}
