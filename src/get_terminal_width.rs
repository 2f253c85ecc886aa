use terminal_size::{terminal_size, Width};

/// Width for wrapping help texts; 120 when not on a terminal.
pub fn get_terminal_width() -> usize {
    if let Some((Width(width), _)) = terminal_size() {
        usize::from(width)
    } else {
        120
    }
}
