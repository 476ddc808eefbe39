use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::device::{CommandOutput, DeviceDriver};
use crate::errors::{PilotError, PilotResult};

static EVENTS_INJECTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Events injected:\s*(\d+)").expect("static regex"));

/// Settle time after an app has been started.
pub const LAUNCH_SETTLE_MS: u64 = 3_000;

const BUILTIN_APPS: &[(&str, &str)] = &[
    ("微信", "com.tencent.mm"),
    ("WeChat", "com.tencent.mm"),
    ("QQ", "com.tencent.mobileqq"),
    ("支付宝", "com.eg.android.AlipayGphone"),
    ("Alipay", "com.eg.android.AlipayGphone"),
    ("淘宝", "com.taobao.taobao"),
    ("Taobao", "com.taobao.taobao"),
    ("抖音", "com.ss.android.ugc.aweme"),
    ("Douyin", "com.ss.android.ugc.aweme"),
    ("TikTok", "com.zhiliaoapp.musically"),
    ("微博", "com.sina.weibo"),
    ("小红书", "com.xingin.xhs"),
    ("美团", "com.sankuai.meituan"),
    ("京东", "com.jingdong.app.mall"),
    ("拼多多", "com.xunmeng.pinduoduo"),
    ("哔哩哔哩", "tv.danmaku.bili"),
    ("bilibili", "tv.danmaku.bili"),
    ("高德地图", "com.autonavi.minimap"),
    ("百度地图", "com.baidu.BaiduMap"),
    ("网易云音乐", "com.netease.cloudmusic"),
    ("设置", "com.android.settings"),
    ("Settings", "com.android.settings"),
    ("相机", "com.android.camera"),
    ("Camera", "com.android.camera"),
    ("图库", "com.android.gallery3d"),
    ("相册", "com.android.gallery3d"),
    ("Gallery", "com.android.gallery3d"),
    ("Photos", "com.google.android.apps.photos"),
    ("计算器", "com.android.calculator2"),
    ("Calculator", "com.android.calculator2"),
    ("时钟", "com.android.deskclock"),
    ("Clock", "com.android.deskclock"),
    ("日历", "com.android.calendar"),
    ("Calendar", "com.android.calendar"),
    ("联系人", "com.android.contacts"),
    ("Contacts", "com.android.contacts"),
    ("电话", "com.android.dialer"),
    ("Phone", "com.android.dialer"),
    ("短信", "com.android.mms"),
    ("信息", "com.android.mms"),
    ("Messages", "com.google.android.apps.messaging"),
    ("浏览器", "com.android.browser"),
    ("Chrome", "com.android.chrome"),
    ("Gmail", "com.google.android.gm"),
    ("YouTube", "com.google.android.youtube"),
    ("Maps", "com.google.android.apps.maps"),
    ("Play Store", "com.android.vending"),
    ("应用商店", "com.android.vending"),
    ("文件管理", "com.android.documentsui"),
    ("Files", "com.android.documentsui"),
];

/// Packages whose generic launch paths are unreliable and need an explicit
/// component start.
const DEDICATED_LAUNCH: &[(&str, &str)] = &[(
    "com.tencent.mm",
    "am start -n com.tencent.mm/com.tencent.mm.ui.LauncherUI",
)];

/// Human app name → package lookup.
#[derive(Debug, Clone)]
pub struct AppCatalog {
    exact: HashMap<String, String>,
    folded: HashMap<String, String>,
}

impl Default for AppCatalog {
    fn default() -> Self {
        Self::with_overrides(&HashMap::new())
    }
}

impl AppCatalog {
    /// Built-in table with `overrides` merged on top.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut exact: HashMap<String, String> = BUILTIN_APPS
            .iter()
            .map(|(name, pkg)| (name.to_string(), pkg.to_string()))
            .collect();
        exact.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        let folded = exact
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();
        Self { exact, folded }
    }

    /// Exact match, then case-insensitive, else the name itself (it may
    /// already be a package id).
    pub fn resolve(&self, app: &str) -> String {
        let app = app.trim();
        self.exact
            .get(app)
            .or_else(|| self.folded.get(&app.to_lowercase()))
            .cloned()
            .unwrap_or_else(|| app.to_string())
    }

    pub fn dedicated_command(&self, package: &str) -> Option<&'static str> {
        DEDICATED_LAUNCH
            .iter()
            .find(|(pkg, _)| *pkg == package)
            .map(|(_, cmd)| *cmd)
    }
}

/// Best-effort reading of `monkey` output. Anything that does not positively
/// report injected events counts as a failed launch.
pub fn monkey_launch_succeeded(out: &CommandOutput) -> bool {
    let text = format!("{}\n{}", out.stdout, out.stderr);
    let lower = text.to_lowercase();
    if lower.contains("no activities found") || lower.contains("no activity found") {
        return false;
    }
    match EVENTS_INJECTED_RE.captures(&text) {
        Some(caps) => out.success && caps[1].parse::<u64>().is_ok_and(|n| n > 0),
        None => false,
    }
}

/// Launcher activity from `cmd package resolve-activity --brief`.
pub fn parse_resolved_activity(output: &str) -> Option<String> {
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.contains('/') && !l.contains(' '))
        .map(str::to_string)
}

fn am_start_ok(out: &CommandOutput) -> bool {
    out.success && !out.stdout.contains("Error") && !out.stderr.contains("Error")
}

/// Starts `package` with the fallback chain: monkey launcher intent, explicit
/// component from a resolve query, then a bare-package MAIN/LAUNCHER intent.
pub async fn launch_package(
    driver: &dyn DeviceDriver,
    serial: &str,
    package: &str,
) -> PilotResult<CommandOutput> {
    let monkey = driver
        .shell(serial, &format!("monkey -p {package} -c android.intent.category.LAUNCHER 1"))
        .await;
    if monkey_launch_succeeded(&monkey) {
        tracing::debug!(serial, package, "launched via monkey");
        return Ok(monkey);
    }
    tracing::warn!(serial, package, stdout = %monkey.stdout.trim(), "monkey launch failed, resolving activity");

    let resolved = driver
        .shell(
            serial,
            &format!("cmd package resolve-activity --brief -c android.intent.category.LAUNCHER {package}"),
        )
        .await;
    if let Some(component) = parse_resolved_activity(&resolved.stdout) {
        let out = driver.shell(serial, &format!("am start -n {component}")).await;
        if am_start_ok(&out) {
            tracing::debug!(serial, component = %component, "launched via resolved activity");
            return Ok(out);
        }
        tracing::warn!(serial, component = %component, stdout = %out.stdout.trim(), "explicit start failed");
    }

    let command = format!(
        "am start -a android.intent.action.MAIN -c android.intent.category.LAUNCHER {package}"
    );
    let out = driver.shell(serial, &command).await;
    if am_start_ok(&out) {
        return Ok(out);
    }
    Err(PilotError::CommandFailed {
        command,
        stderr: format!(
            "could not launch {package}: {}",
            if out.stderr.trim().is_empty() { out.stdout.trim() } else { out.stderr.trim() }
        ),
        exit_code: out.exit_code,
    })
}
