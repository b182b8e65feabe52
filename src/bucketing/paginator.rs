//! Keyset pagination over the report store.
//!
//! Windows are addressed by the last report id already processed rather than
//! by a numeric offset, so reports inserted or deleted during a run cannot
//! shift window boundaries.

use crate::model::{Report, ReportId};
use crate::store::{ReportStore, StoreResult};

/// Position of a paginator: the last report id already handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowCursor {
    last_report_id: Option<ReportId>,
}

impl WindowCursor {
    /// Cursor before the first report.
    pub fn start() -> Self {
        Self::default()
    }

    /// Cursor resuming after `report_id`.
    pub fn after(report_id: ReportId) -> Self {
        Self {
            last_report_id: Some(report_id),
        }
    }

    pub fn last_report_id(&self) -> Option<ReportId> {
        self.last_report_id
    }
}

/// One fetched slice of reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub start_after: Option<ReportId>,
    pub limit: usize,
    pub reports: Vec<Report>,
}

impl Window {
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// A window shorter than its limit is the last one.
    pub fn is_final(&self) -> bool {
        self.reports.len() < self.limit
    }

    pub fn last_report_id(&self) -> Option<ReportId> {
        self.reports.last().map(|report| report.id)
    }
}

/// Walks the report store window by window.
///
/// Used as an `Iterator` it advances automatically. The orchestrator instead
/// calls [`Paginator::current`] and only calls [`Paginator::advance`] once a
/// window has been fully flushed.
pub struct Paginator<'s, R: ReportStore + ?Sized> {
    store: &'s R,
    window_size: usize,
    cursor: WindowCursor,
    exhausted: bool,
}

impl<'s, R: ReportStore + ?Sized> Paginator<'s, R> {
    pub fn new(store: &'s R, window_size: usize, cursor: WindowCursor) -> Self {
        Self {
            store,
            window_size,
            cursor,
            exhausted: window_size == 0,
        }
    }

    pub fn cursor(&self) -> WindowCursor {
        self.cursor
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Moves the cursor to an explicit position and clears exhaustion.
    pub fn reset(&mut self, cursor: WindowCursor) {
        self.cursor = cursor;
        self.exhausted = self.window_size == 0;
    }

    /// Fetches the window at the cursor without moving it.
    ///
    /// Returns `None` once pagination is over: after a final window was
    /// advanced past, or when the store has nothing beyond the cursor.
    pub fn current(&self) -> StoreResult<Option<Window>> {
        if self.exhausted {
            return Ok(None);
        }

        let start_after = self.cursor.last_report_id();
        let reports = self.store.fetch_window(start_after, self.window_size)?;
        if reports.is_empty() {
            return Ok(None);
        }

        Ok(Some(Window {
            start_after,
            limit: self.window_size,
            reports,
        }))
    }

    /// Commits `window` as processed.
    pub fn advance(&mut self, window: &Window) {
        debug_assert_eq!(window.start_after, self.cursor.last_report_id());
        if let Some(last) = window.last_report_id() {
            self.cursor = WindowCursor::after(last);
        }
        if window.is_final() {
            self.exhausted = true;
        }
    }
}

impl<'s, R: ReportStore + ?Sized> Iterator for Paginator<'s, R> {
    type Item = StoreResult<Window>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.current() {
            Ok(Some(window)) => {
                self.advance(&window);
                Some(Ok(window))
            }
            Ok(None) => {
                self.exhausted = true;
                None
            }
            Err(err) => {
                self.exhausted = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewReport;
    use crate::store::{MemoryStore, ReportIngest};
    use chrono::DateTime;

    fn store_with(count: i64) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .ingest(
                (0..count)
                    .map(|i| {
                        NewReport::new(
                            "Acrobat Pro",
                            "2024.1",
                            "1",
                            "Acrobat ProCore",
                            i,
                            DateTime::from_timestamp_millis(i).unwrap(),
                        )
                    })
                    .collect(),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_windows_cover_every_report_once() {
        let store = store_with(250);
        let windows: Vec<Window> = Paginator::new(&store, 100, WindowCursor::start())
            .collect::<StoreResult<_>>()
            .unwrap();

        assert_eq!(
            windows.iter().map(Window::len).collect::<Vec<_>>(),
            vec![100, 100, 50]
        );
        let ids: Vec<ReportId> = windows
            .iter()
            .flat_map(|w| w.reports.iter().map(|r| r.id))
            .collect();
        assert_eq!(ids, (1..=250).collect::<Vec<_>>());
    }

    #[test]
    fn test_short_window_ends_pagination_without_extra_fetch() {
        let store = store_with(250);
        let mut paginator = Paginator::new(&store, 100, WindowCursor::start());
        for _ in paginator.by_ref() {}
        store.reset_stats();

        assert!(paginator.next().is_none());
        assert_eq!(store.stats().reads, 0);
    }

    #[test]
    fn test_exact_multiple_ends_on_empty_window() {
        let store = store_with(200);
        let windows: Vec<Window> = Paginator::new(&store, 100, WindowCursor::start())
            .collect::<StoreResult<_>>()
            .unwrap();

        assert_eq!(windows.len(), 2);
    }

    #[test]
    fn test_current_does_not_advance() {
        let store = store_with(5);
        let mut paginator = Paginator::new(&store, 2, WindowCursor::start());

        let first = paginator.current().unwrap().unwrap();
        let again = paginator.current().unwrap().unwrap();
        assert_eq!(first, again);

        paginator.advance(&first);
        assert_eq!(paginator.cursor(), WindowCursor::after(2));
        let second = paginator.current().unwrap().unwrap();
        assert_eq!(second.start_after, Some(2));
        assert_eq!(second.last_report_id(), Some(4));
    }

    #[test]
    fn test_resume_from_cursor() {
        let store = store_with(250);
        let resumed: Vec<Window> = Paginator::new(&store, 100, WindowCursor::after(100))
            .collect::<StoreResult<_>>()
            .unwrap();

        assert_eq!(resumed.len(), 2);
        assert_eq!(resumed[0].reports[0].id, 101);
    }

    #[test]
    fn test_empty_store() {
        let store = MemoryStore::new();
        let mut paginator = Paginator::new(&store, 100, WindowCursor::start());

        assert!(paginator.next().is_none());
        assert!(paginator.is_exhausted());
    }
}
