//! Screen selection and UI-only state.

/// Screen currently shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Screen {
    /// Properties, report jobs and log.
    Main,
    /// Company branding editor.
    Branding,
}

/// UI state shared between input handling and rendering.
#[derive(Clone, Debug)]
pub struct UiState {
    pub screen: Screen,
    /// Selected row in the merged property list.
    pub selected: usize,
    /// Recent log lines for the info panel.
    pub log: Vec<String>,
    /// Status bar text.
    pub status: String,
    /// Last error, shown in red until the next successful action.
    pub error: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            screen: Screen::Main,
            selected: 0,
            log: vec![],
            status: "Ready".into(),
            error: None,
        }
    }
}

impl UiState {
    /// Append a log line, keeping the buffer bounded.
    pub fn push_log(&mut self, line: impl Into<String>) {
        const MAX_LOG: usize = 200;
        self.log.push(line.into());
        if self.log.len() > MAX_LOG {
            let excess = self.log.len() - MAX_LOG;
            self.log.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_is_bounded() {
        let mut ui = UiState::default();
        for i in 0..250 {
            ui.push_log(format!("line {i}"));
        }
        assert_eq!(ui.log.len(), 200);
        assert_eq!(ui.log[0], "line 50");
    }
}
