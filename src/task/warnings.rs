/// Warnings collected during one run, capped at a fixed number
#[derive(Debug, Clone)]
pub struct WarningLog {
    limit: usize,
    kept: Vec<String>,
    suppressed: usize,
}

impl WarningLog {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            kept: Vec::new(),
            suppressed: 0,
        }
    }

    pub fn push(&mut self, warning: impl Into<String>) {
        if self.kept.len() < self.limit {
            self.kept.push(warning.into());
        } else {
            self.suppressed += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.kept.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kept.is_empty() && self.suppressed == 0
    }

    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    pub fn warnings(&self) -> &[String] {
        &self.kept
    }

    pub fn into_parts(self) -> (Vec<String>, usize) {
        (self.kept, self.suppressed)
    }
}
