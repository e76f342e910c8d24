/// Page counter for one paginated listing. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    page: u32,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self { page: 1 }
    }
}

impl PageCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u32 {
        self.page
    }

    /// Moves the cursor by `delta` pages and returns the page to request.
    /// Never goes below the first page.
    pub fn advance(&mut self, delta: i32) -> u32 {
        let next = i64::from(self.page) + i64::from(delta);
        self.page = next.clamp(1, i64::from(u32::MAX)) as u32;
        self.page
    }
}
