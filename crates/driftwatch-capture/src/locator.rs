use std::path::PathBuf;

use async_trait::async_trait;
use driftwatch_types::{geometry::Region, DriftwatchError, Result};
use tokio::{
    process::Command,
    time::{sleep, Duration},
};
use tracing::{debug, warn};

const DEFAULT_XDOTOOL: &str = "xdotool";
const DEFAULT_XRANDR: &str = "xrandr";

/// Finds and activates the window a browser-targeting source captures.
#[async_trait]
pub trait WindowLocator: Send + Sync {
    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    /// True if a browser-like window was found and activated.
    async fn focus_browser_window(&self) -> bool;
}

/// Reports monitor geometry.
#[async_trait]
pub trait MonitorLocator: Send + Sync {
    /// Geometry of the physical monitor with the smallest horizontal offset;
    /// `None` when fewer than two physical monitors are present.
    async fn leftmost_monitor_region(&self) -> Option<Region>;
}

pub struct XdotoolWindowLocator {
    xdotool_path: PathBuf,
    pattern: String,
    settle: Duration,
}

impl XdotoolWindowLocator {
    pub fn new(xdotool_path: Option<&str>, pattern: impl Into<String>, settle_ms: u64) -> Self {
        Self {
            xdotool_path: PathBuf::from(xdotool_path.unwrap_or(DEFAULT_XDOTOOL)),
            pattern: pattern.into(),
            settle: Duration::from_millis(settle_ms),
        }
    }

    async fn run(&self, args: &[&str]) -> Option<String> {
        let output = Command::new(&self.xdotool_path)
            .args(args)
            .output()
            .await
            .map_err(|err| debug!("failed to run xdotool ({}): {err}", args.join(" ")))
            .ok()?;
        if !output.status.success() {
            debug!("xdotool {} exited with {}", args.join(" "), output.status);
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl WindowLocator for XdotoolWindowLocator {
    async fn probe(&self) -> Result<()> {
        Command::new(&self.xdotool_path)
            .arg("--version")
            .output()
            .await
            .map(|_| ())
            .map_err(|err| {
                DriftwatchError::ResourceUnavailable(format!(
                    "`{}` is required for browser capture ({err})",
                    self.xdotool_path.display()
                ))
            })
    }

    async fn focus_browser_window(&self) -> bool {
        let Some(listing) = self
            .run(&["search", "--onlyvisible", "--name", &self.pattern])
            .await
        else {
            return false;
        };
        let Some(window_id) = listing.lines().map(str::trim).find(|line| !line.is_empty()) else {
            return false;
        };
        if self.run(&["windowactivate", window_id]).await.is_none() {
            warn!("Found browser window {window_id} but could not activate it");
            return false;
        }
        sleep(self.settle).await;
        true
    }
}

pub struct XrandrMonitorLocator {
    xrandr_path: PathBuf,
}

impl XrandrMonitorLocator {
    pub fn new(xrandr_path: Option<&str>) -> Self {
        Self {
            xrandr_path: PathBuf::from(xrandr_path.unwrap_or(DEFAULT_XRANDR)),
        }
    }
}

#[async_trait]
impl MonitorLocator for XrandrMonitorLocator {
    async fn leftmost_monitor_region(&self) -> Option<Region> {
        let output = match Command::new(&self.xrandr_path)
            .arg("--listmonitors")
            .output()
            .await
        {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                warn!("xrandr --listmonitors exited with {}", output.status);
                return None;
            }
            Err(err) => {
                warn!("xrandr unavailable: {err}");
                return None;
            }
        };
        let monitors = parse_listmonitors(&String::from_utf8_lossy(&output.stdout));
        debug!("xrandr reported {} physical monitor(s)", monitors.len());
        leftmost(&monitors)
    }
}

/// Parse `xrandr --listmonitors`, keeping only monitors backed by a real
/// output (name prefixed with `+`).
///
/// ```text
/// Monitors: 2
///  0: +*DP-1 1920/527x1080/296+1280+0  DP-1
///  1: +HDMI-1 1280/338x1024/270+0+0  HDMI-1
/// ```
pub fn parse_listmonitors(listing: &str) -> Vec<Region> {
    listing
        .lines()
        .filter_map(|line| {
            let (_, rest) = line.split_once(':')?;
            let mut fields = rest.split_whitespace();
            let name = fields.next()?;
            if !name.starts_with('+') {
                return None;
            }
            parse_geometry(fields.next()?)
        })
        .collect()
}

/// `1920/527x1080/296+1280+0` -> 1920x1080 at (1280, 0).
fn parse_geometry(token: &str) -> Option<Region> {
    let (size, offsets) = token.split_at(token.find(['+', '-'])?);
    let (width, height) = size.split_once('x')?;
    let width = width.split('/').next()?.parse().ok()?;
    let height = height.split('/').next()?.parse().ok()?;

    let split = offsets[1..].find(['+', '-'])? + 1;
    let (left, top) = offsets.split_at(split);
    Some(Region::new(
        left.parse().ok()?,
        top.parse().ok()?,
        width,
        height,
    ))
}

pub fn leftmost(monitors: &[Region]) -> Option<Region> {
    if monitors.len() < 2 {
        return None;
    }
    monitors.iter().copied().min_by_key(|region| region.left)
}

/// Fixed answer, for tests and setups without X tooling.
pub struct StaticWindowLocator {
    found: bool,
}

impl StaticWindowLocator {
    pub fn new(found: bool) -> Self {
        Self { found }
    }
}

#[async_trait]
impl WindowLocator for StaticWindowLocator {
    async fn focus_browser_window(&self) -> bool {
        self.found
    }
}

pub struct StaticMonitorLocator {
    region: Option<Region>,
}

impl StaticMonitorLocator {
    pub fn new(region: Option<Region>) -> Self {
        Self { region }
    }
}

#[async_trait]
impl MonitorLocator for StaticMonitorLocator {
    async fn leftmost_monitor_region(&self) -> Option<Region> {
        self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_MONITORS: &str = "Monitors: 2\n 0: +*DP-1 1920/527x1080/296+1280+0  DP-1\n 1: +HDMI-1 1280/338x1024/270+0+0  HDMI-1\n";

    #[test]
    fn parse_two_physical_monitors() {
        let monitors = parse_listmonitors(TWO_MONITORS);
        assert_eq!(
            monitors,
            vec![
                Region::new(1280, 0, 1920, 1080),
                Region::new(0, 0, 1280, 1024)
            ]
        );
        assert_eq!(leftmost(&monitors), Some(Region::new(0, 0, 1280, 1024)));
    }

    #[test]
    fn virtual_monitors_are_ignored() {
        let listing = "Monitors: 2\n 0: +*eDP-1 1920/344x1080/194+0+0  eDP-1\n 1: SPLIT 960/172x1080/194+960+0  none\n";
        let monitors = parse_listmonitors(listing);
        assert_eq!(monitors, vec![Region::new(0, 0, 1920, 1080)]);
        assert_eq!(leftmost(&monitors), None);
    }

    #[test]
    fn negative_offsets_parse() {
        assert_eq!(
            parse_geometry("1280/338x1024/270-1280+0"),
            Some(Region::new(-1280, 0, 1280, 1024))
        );
        assert_eq!(parse_geometry("garbage"), None);
    }

    #[tokio::test]
    async fn static_locators_answer_fixed_values() {
        assert!(StaticWindowLocator::new(true).focus_browser_window().await);
        assert_eq!(
            StaticMonitorLocator::new(None).leftmost_monitor_region().await,
            None
        );
    }
}
