//! Cursor over the pages a job has to print.
//! 列印作業需要輸出之頁面的游標。

use crate::settings::{PageRange, PrintSettings};

/// Walks either the flat sequence `[0, page_count)` or the explicit ranges of
/// a settings snapshot. Once exhausted it stays on the sentinel
/// ([`PageNumber::npos`]) for good.
/// 依序走訪 `[0, page_count)` 或設定中的頁面範圍；走完後永遠停在哨兵值。
#[derive(Debug, Clone, Default)]
pub struct PageNumber {
    ranges: Vec<PageRange>,
    page_number: Option<u32>,
    page_range_index: Option<usize>,
    document_page_count: u32,
}

impl PageNumber {
    /// Cursor bound to `settings` and positioned on the first page to print.
    /// 建立綁定設定並指向第一個要列印頁面的游標。
    pub fn new(settings: &PrintSettings, document_page_count: u32) -> Self {
        let mut page = Self::npos();
        page.init(settings, document_page_count);
        page
    }

    /// The "no more pages" sentinel.
    /// 「沒有更多頁面」的哨兵值。
    pub fn npos() -> Self {
        Self::default()
    }

    /// Rebinds the cursor. Empty ranges with a zero page count yield the sentinel.
    /// 重新綁定游標；沒有範圍且頁數為零時直接成為哨兵值。
    pub fn init(&mut self, settings: &PrintSettings, document_page_count: u32) {
        self.document_page_count = document_page_count;
        self.ranges = settings.ranges.clone();
        match self.ranges.first() {
            Some(first) => {
                self.page_range_index = Some(0);
                self.page_number = Some(first.from);
            }
            None => {
                self.page_range_index = None;
                self.page_number = (document_page_count > 0).then_some(0);
            }
        }
    }

    /// Prefix increment. Moves to the next page, the next range or the sentinel.
    /// 前置遞增：移到下一頁、下一個範圍，或成為哨兵值。
    pub fn increment(&mut self) -> &mut Self {
        let Some(current) = self.page_number else {
            return self;
        };
        let next = current + 1;
        match self.page_range_index {
            None => {
                self.page_number = (next < self.document_page_count).then_some(next);
            }
            Some(index) => {
                if next <= self.ranges[index].to {
                    self.page_number = Some(next);
                } else if let Some(range) = self.ranges.get(index + 1) {
                    self.page_range_index = Some(index + 1);
                    self.page_number = Some(range.from);
                } else {
                    self.page_number = None;
                    self.page_range_index = None;
                }
            }
        }
        self
    }

    /// Current page index, `None` on the sentinel.
    pub fn get(&self) -> Option<u32> {
        self.page_number
    }

    /// Current page index, or `-1` on the sentinel.
    pub fn to_int(&self) -> i32 {
        self.page_number.map_or(-1, |page| page as i32)
    }

    pub fn is_npos(&self) -> bool {
        self.page_number.is_none()
    }
}

impl PartialEq for PageNumber {
    fn eq(&self, other: &Self) -> bool {
        self.page_number == other.page_number && self.page_range_index == other.page_range_index
    }
}

impl Eq for PageNumber {}

impl Iterator for PageNumber {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let current = self.page_number?;
        self.increment();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with(ranges: Vec<PageRange>) -> PrintSettings {
        PrintSettings {
            ranges,
            ..PrintSettings::default()
        }
    }

    #[test]
    fn flat_sequence_hits_sentinel_on_last_increment() {
        for count in 0..6u32 {
            let mut page = PageNumber::new(&PrintSettings::default(), count);
            for step in 0..count {
                assert_eq!(page.to_int(), step as i32, "count {count}");
                page.increment();
            }
            assert_eq!(page, PageNumber::npos(), "count {count}");
        }
    }

    #[test]
    fn ranges_are_walked_in_order() {
        let settings = settings_with(vec![PageRange::new(1, 3), PageRange::new(10, 12)]);
        let pages: Vec<u32> = PageNumber::new(&settings, 20).collect();
        assert_eq!(pages, vec![1, 2, 3, 10, 11, 12]);
    }

    #[test]
    fn single_page_range() {
        let settings = settings_with(vec![PageRange::new(4, 4)]);
        let mut page = PageNumber::new(&settings, 5);
        assert_eq!(page.to_int(), 4);
        page.increment();
        assert!(page.is_npos());
    }

    #[test]
    fn sentinel_is_sticky() {
        let mut page = PageNumber::new(&PrintSettings::default(), 1);
        page.increment();
        page.increment();
        page.increment();
        assert_eq!(page.to_int(), -1);
        assert_eq!(page, PageNumber::npos());
    }

    #[test]
    fn sentinels_compare_equal_regardless_of_origin() {
        let mut ranged = PageNumber::new(&settings_with(vec![PageRange::new(0, 0)]), 3);
        ranged.increment();
        let empty = PageNumber::new(&PrintSettings::default(), 0);
        assert_eq!(ranged, empty);
        assert_eq!(empty, PageNumber::npos());
    }

    #[test]
    fn same_index_in_different_modes_differs() {
        let flat = PageNumber::new(&PrintSettings::default(), 3);
        let ranged = PageNumber::new(&settings_with(vec![PageRange::new(0, 2)]), 3);
        assert_eq!(flat.to_int(), ranged.to_int());
        assert_ne!(flat, ranged);
    }
}
