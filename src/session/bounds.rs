use crate::config::TitleBarStyle;

/// Height of the account switcher and of the update bar.
pub const TOP_ELEMENT_HEIGHT: u32 = 40;

/// Height of the custom title bar drawn on Linux/Windows.
pub const APP_TITLE_BAR_HEIGHT: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOs,
    Linux,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Platform::MacOs
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundsInput {
    pub platform: Platform,
    pub title_bar_style: TitleBarStyle,
    pub has_multiple: bool,
    pub update_available: bool,
}

/// Rectangle handed to the window manager for every account view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds {
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
}

pub fn compute_bounds(input: BoundsInput, width: u32, height: u32) -> Bounds {
    let mut offset = match (input.platform, input.title_bar_style) {
        (Platform::MacOs, _) | (_, TitleBarStyle::System) => 0,
        _ => APP_TITLE_BAR_HEIGHT,
    };
    if input.has_multiple {
        offset += TOP_ELEMENT_HEIGHT;
    }
    if input.update_available {
        offset += TOP_ELEMENT_HEIGHT;
    }

    Bounds {
        offset_y: offset,
        width,
        height: height.saturating_sub(offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(platform: Platform, style: TitleBarStyle, multi: bool, update: bool) -> BoundsInput {
        BoundsInput {
            platform,
            title_bar_style: style,
            has_multiple: multi,
            update_available: update,
        }
    }

    #[test]
    fn macos_single_account_has_no_offset() {
        let b = compute_bounds(input(Platform::MacOs, TitleBarStyle::App, false, false), 800, 600);
        assert_eq!(b, Bounds { offset_y: 0, width: 800, height: 600 });
    }

    #[test]
    fn linux_app_title_bar_adds_offset() {
        let b = compute_bounds(input(Platform::Linux, TitleBarStyle::App, false, false), 800, 600);
        assert_eq!(b.offset_y, 30);
        assert_eq!(b.height, 570);

        let b = compute_bounds(input(Platform::Windows, TitleBarStyle::System, false, false), 800, 600);
        assert_eq!(b.offset_y, 0);
    }

    #[test]
    fn switcher_and_update_bar_stack() {
        let b = compute_bounds(input(Platform::Linux, TitleBarStyle::App, true, true), 1000, 700);
        assert_eq!(b.offset_y, 30 + 40 + 40);
        assert_eq!(b.height, 700 - 110);
        assert_eq!(b.width, 1000);
    }

    #[test]
    fn tiny_window_does_not_underflow() {
        let b = compute_bounds(input(Platform::Linux, TitleBarStyle::App, true, true), 100, 50);
        assert_eq!(b.height, 0);
    }
}
