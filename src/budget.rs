/// Character-count accumulator. Additions that would push the running total
/// past the limit are refused whole; nothing is ever partially admitted.
#[derive(Debug, Clone)]
pub struct CharBudget {
    limit: usize,
    used: usize,
}

impl CharBudget {
    pub fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    /// Admit `text` if it fits in what remains.
    pub fn try_add(&mut self, text: &str) -> bool {
        self.try_reserve(text.chars().count())
    }

    pub fn try_reserve(&mut self, chars: usize) -> bool {
        match self.used.checked_add(chars) {
            Some(total) if total <= self.limit => {
                self.used = total;
                true
            }
            _ => false,
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_without_partial_admission() {
        let mut budget = CharBudget::new(10);
        assert!(budget.try_add("hello"));
        assert!(!budget.try_add("world!"));
        assert_eq!(budget.used(), 5);
        assert!(budget.try_add("world"));
        assert_eq!(budget.remaining(), 0);
        assert!(!budget.try_add("x"));
        assert!(budget.try_add(""));
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        let mut budget = CharBudget::new(3);
        assert!(budget.try_add("äöü"));
        assert_eq!(budget.used(), 3);
    }

    #[test]
    fn test_reserve_overflow_is_rejected() {
        let mut budget = CharBudget::new(5);
        assert!(budget.try_reserve(1));
        assert!(!budget.try_reserve(usize::MAX));
        assert_eq!(budget.used(), 1);
    }
}
