use anyhow::{Context, Result};
use tracing::debug;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::*;
use x11rb::protocol::xtest::ConnectionExt as XTestExt;
use x11rb::rust_connection::RustConnection;

use crate::config::Point;
use crate::constants::mouse;
use crate::event_handler::Actuator;
use crate::input::PointerLocator;

/// Pre-cached X11 atoms to avoid repeated roundtrips
pub struct CachedAtoms {
    pub wm_name: Atom,
    pub net_wm_name: Atom,
    pub utf8_string: Atom,
    pub net_active_window: Atom,
}

impl CachedAtoms {
    pub fn new(conn: &RustConnection) -> Result<Self> {
        Ok(Self {
            wm_name: intern(conn, "WM_NAME")?,
            net_wm_name: intern(conn, "_NET_WM_NAME")?,
            utf8_string: intern(conn, "UTF8_STRING")?,
            net_active_window: intern(conn, "_NET_ACTIVE_WINDOW")?,
        })
    }
}

fn intern(conn: &RustConnection, name: &str) -> Result<Atom> {
    Ok(conn
        .intern_atom(false, name.as_bytes())
        .with_context(|| format!("Failed to intern {name} atom"))?
        .reply()
        .with_context(|| format!("Failed to get reply for {name} atom"))?
        .atom)
}

/// X11 connection used to synthesize clicks and inspect focus
pub struct X11Session {
    conn: RustConnection,
    root: Window,
    atoms: CachedAtoms,
}

impl X11Session {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None)
            .context("Failed to connect to X11 server. Is DISPLAY set correctly?")?;
        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        debug!(
            screen = screen_num,
            width = screen.width_in_pixels,
            height = screen.height_in_pixels,
            "Connected to X11 server"
        );

        let version = conn
            .xtest_get_version(2, 2)
            .context("Failed to query XTEST extension version")?
            .reply()
            .context("XTEST extension not available")?;
        debug!(major = version.major_version, minor = version.minor_version, "XTEST available");

        let atoms = CachedAtoms::new(&conn).context("Failed to cache X11 atoms at startup")?;
        Ok(Self { conn, root, atoms })
    }

    fn pointer(&self) -> Result<(i16, i16)> {
        let reply = self
            .conn
            .query_pointer(self.root)
            .context("Failed to query pointer")?
            .reply()
            .context("Failed to get reply for pointer query")?;
        Ok((reply.root_x, reply.root_y))
    }

    fn warp(&self, x: i16, y: i16) -> Result<()> {
        self.conn
            .warp_pointer(x11rb::NONE, self.root, 0, 0, 0, 0, x, y)
            .with_context(|| format!("Failed to move pointer to ({x}, {y})"))?;
        Ok(())
    }

    fn fake_button(&self, event_type: u8) -> Result<()> {
        self.conn
            .xtest_fake_input(
                event_type,
                mouse::BUTTON_LEFT,
                x11rb::CURRENT_TIME,
                self.root,
                0,
                0,
                0,
            )
            .context("Failed to send XTEST button event")?;
        Ok(())
    }

    /// Left-click at `point`, optionally returning the pointer afterwards
    pub fn click(&self, point: Point, restore: bool) -> Result<()> {
        let x = i16::try_from(point.x)
            .with_context(|| format!("x coordinate {} out of range", point.x))?;
        let y = i16::try_from(point.y)
            .with_context(|| format!("y coordinate {} out of range", point.y))?;

        let original = if restore { Some(self.pointer()?) } else { None };

        self.warp(x, y)?;
        self.fake_button(BUTTON_PRESS_EVENT)?;
        self.fake_button(BUTTON_RELEASE_EVENT)?;

        if let Some((orig_x, orig_y)) = original {
            self.warp(orig_x, orig_y)?;
        }

        self.conn
            .flush()
            .context("Failed to flush X11 connection after click")?;
        Ok(())
    }

    /// Title of the window named by `_NET_ACTIVE_WINDOW`, if any
    pub fn focused_window_title(&self) -> Result<Option<String>> {
        let active_window_prop = self
            .conn
            .get_property(false, self.root, self.atoms.net_active_window, AtomEnum::WINDOW, 0, 1)
            .context("Failed to query _NET_ACTIVE_WINDOW property")?
            .reply()
            .context("Failed to get reply for _NET_ACTIVE_WINDOW query")?;

        let Some(active_window) = active_window_prop.value32().and_then(|mut v| v.next()) else {
            return Ok(None);
        };
        if active_window == x11rb::NONE {
            return Ok(None);
        }

        for (property, type_) in [
            (self.atoms.net_wm_name, self.atoms.utf8_string),
            (self.atoms.wm_name, u32::from(AtomEnum::ANY)),
        ] {
            let reply = self
                .conn
                .get_property(false, active_window, property, type_, 0, 1024)
                .with_context(|| format!("Failed to query title of window {active_window}"))?
                .reply()
                .with_context(|| format!("Failed to get title reply for window {active_window}"))?;
            if !reply.value.is_empty() {
                return Ok(Some(String::from_utf8_lossy(&reply.value).into_owned()));
            }
        }
        Ok(None)
    }
}

/// Case-insensitive substring match of `wanted` in `focused`
pub fn title_matches(focused: &str, wanted: &str) -> bool {
    focused.to_lowercase().contains(&wanted.to_lowercase())
}

impl Actuator for X11Session {
    fn click_at(&mut self, point: Point, restore: bool) -> Result<()> {
        self.click(point, restore)
    }

    fn is_window_focused(&mut self, title: &str) -> bool {
        // Fail open: without focus information the click is allowed
        match self.focused_window_title() {
            Ok(Some(focused)) => {
                let matched = title_matches(&focused, title);
                debug!(focused = %focused, wanted = %title, matched, "Checked focused window");
                matched
            }
            Ok(None) => {
                debug!("No focused window title available, allowing click");
                true
            }
            Err(e) => {
                debug!(error = ?e, "Focus lookup failed, allowing click");
                true
            }
        }
    }
}

impl PointerLocator for X11Session {
    fn pointer_position(&self) -> Result<Point> {
        let (x, y) = self.pointer()?;
        Ok(Point::new(i32::from(x), i32::from(y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_matches_case_insensitive_substring() {
        assert!(title_matches("Valeton GP-100 Editor", "valeton"));
        assert!(title_matches("VALETON", "Valeton"));
        assert!(!title_matches("Firefox", "Valeton"));
    }

    #[test]
    fn test_empty_title_matches_anything() {
        assert!(title_matches("Firefox", ""));
    }
}
