//! UID to package resolution
//!
//! String pool entries carry a service name and the UID that owns it. A
//! [`PackageResolver`] turns those into an owning package when it can.

use crate::types::AnalyzerError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Range of UIDs allocated to one user
pub const PER_USER_RANGE: i32 = 100_000;
/// First UID reserved for applications
pub const FIRST_APPLICATION_UID: i32 = 10_000;
const FIRST_ISOLATED_UID: i32 = 99_000;
const FIRST_SHARED_APPLICATION_GID: i32 = 50_000;
const LAST_SHARED_APPLICATION_GID: i32 = 59_999;

static ABBREVIATED_UID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^u(?P<user>\d+)(?P<kind>[ias])(?P<app>\d+)$").expect("uid pattern is valid")
});

static CHECKIN_APK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+,)?(?P<uid>\d+),l,apk,\d+,(?P<package>[^,]+),.*")
        .expect("checkin apk pattern is valid")
});

/// Sync adapter and provider names whose owning package is not obvious
const SYNC_ADAPTER_PACKAGES: &[(&str, &str)] = &[
    ("com.android.calendar", "com.android.providers.calendar"),
    ("com.android.contacts", "com.android.providers.contacts"),
    ("com.android.gmail.ui", "com.google.android.gm"),
    ("com.android.inputmethod.latin", "com.google.android.inputmethod.latin"),
    ("com.android.mail.notifier", "com.google.android.gm"),
    ("com.google.android.apps.bigtop", "com.google.android.apps.inbox"),
    ("com.google.android.apps.docs.editors.kix", "com.google.android.apps.docs.editors.docs"),
    ("com.google.android.apps.docs.editors.punch", "com.google.android.apps.docs.editors.slides"),
    ("com.google.android.apps.docs.editors.ritz", "com.google.android.apps.docs.editors.sheets"),
    ("com.google.android.apps.docs.editors.trix", "com.google.android.apps.docs.editors.sheets"),
    ("com.google.android.apps.hangouts.content.EsProvider", "com.google.android.talk"),
    ("com.google.android.apps.photos.content", "com.google.android.apps.plus"),
    ("com.google.android.finsky.AppIconProvider", "com.android.vending"),
    ("com.google.android.gm2.accountcache", "com.google.android.gm"),
    ("com.google.android.gmail.provider", "com.google.android.gm"),
    ("com.google.android.launcher.settings", "com.google.android.googlequicksearchbox"),
    ("com.google.android.location.internal", "com.google.android.gms"),
    ("com.google.android.location.reporting", "com.google.android.gms"),
    ("com.google.android.maps.NavigationAvailabilityProvider", "com.google.android.apps.maps"),
    ("com.google.android.providers.talk", "com.google.android.gsf"),
    ("com.google.contacts.gal.provider", "com.google.android.syncadapters.contacts"),
    ("com.google.plus.platform", "com.google.android.apps.plus"),
    ("com.google.settings", "com.google.android.gsf"),
    ("contacts;com.android.contacts", "com.android.providers.contacts"),
    ("gmail-appindexing", "com.google.android.gm"),
    ("gmail-disnot", "com.google.android.gm"),
    ("gmail-ls", "com.google.android.gm"),
    ("subscribedfeeds", "com.google.android.gsf"),
];

/// Strip the user id from a UID; shared GIDs map back to their app id
pub fn app_id(uid: i32) -> i32 {
    let id = uid % PER_USER_RANGE;
    if (FIRST_SHARED_APPLICATION_GID..=LAST_SHARED_APPLICATION_GID).contains(&id) {
        return id + FIRST_APPLICATION_UID - FIRST_SHARED_APPLICATION_GID;
    }
    id
}

/// App id of a textual UID: `"10001"`, `"1010001"` or the abbreviated `"u0a1"`.
/// The empty string yields 0.
pub fn app_id_from_str(uid: &str) -> Option<i32> {
    if uid.is_empty() {
        return Some(0);
    }
    if let Some(caps) = ABBREVIATED_UID_RE.captures(uid) {
        let app: i32 = caps["app"].parse().ok()?;
        return match &caps["kind"] {
            "i" => Some(app + FIRST_ISOLATED_UID),
            "a" => Some(app + FIRST_APPLICATION_UID),
            _ => Some(app),
        };
    }
    uid.parse::<i32>().ok().map(app_id)
}

/// Best guess at the package owning a sync adapter or wakelock name
fn guess_from_identifier(identifier: &str, candidates: &[&str]) -> Option<String> {
    let mut target = identifier;
    let mut matched_key = "";
    for &(key, package) in SYNC_ADAPTER_PACKAGES {
        if identifier.contains(key) && key.len() > matched_key.len() {
            target = package;
            matched_key = key;
        }
    }

    // Longest match wins, "android" alone would match almost everything
    candidates
        .iter()
        .copied()
        .filter(|pkg| !pkg.is_empty() && target.contains(pkg))
        .max_by_key(|pkg| pkg.len())
        .map(|pkg| pkg.to_string())
        .or_else(|| (!matched_key.is_empty()).then(|| target.to_string()))
}

/// Maps string pool entries to owning packages
pub trait PackageResolver {
    /// Owning package of `service` reported under `uid`, if known
    fn resolve(&self, service: &str, uid: &str) -> Option<String>;

    /// Display name for a numeric UID
    fn package_name(&self, uid: i32) -> String;
}

/// Resolver that knows no packages
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPackages;

impl PackageResolver for NoPackages {
    fn resolve(&self, _service: &str, _uid: &str) -> Option<String> {
        None
    }

    fn package_name(&self, uid: i32) -> String {
        uid.to_string()
    }
}

/// Packages by app id, read from the checkin `apk` lines
///
/// UIDs shared by several packages map to the names joined with `;`.
#[derive(Debug, Default, Clone)]
pub struct UidPackageMap {
    packages: BTreeMap<i32, String>,
}

impl UidPackageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the map from a checkin dump; unparsable UIDs are returned as errors
    pub fn from_checkin(checkin: &str) -> (Self, Vec<AnalyzerError>) {
        let mut map = Self::new();
        let mut errors = Vec::new();

        for line in checkin.lines() {
            let Some(caps) = CHECKIN_APK_RE.captures(line) else {
                continue;
            };
            let uid = match caps["uid"].parse::<i32>() {
                Ok(uid) => uid,
                Err(_) => {
                    errors.push(AnalyzerError::InvalidCheckinUid(caps["uid"].to_string()));
                    continue;
                }
            };
            map.insert(uid, &caps["package"]);
        }

        log::debug!("loaded {} app ids from checkin", map.packages.len());
        (map, errors)
    }

    /// Register a package under the app id of `uid`
    pub fn insert(&mut self, uid: i32, package: &str) {
        self.packages
            .entry(app_id(uid))
            .and_modify(|names| {
                names.push(';');
                names.push_str(package);
            })
            .or_insert_with(|| package.to_string());
    }

    pub fn get(&self, uid: i32) -> Option<&str> {
        self.packages.get(&app_id(uid)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl PackageResolver for UidPackageMap {
    fn resolve(&self, service: &str, uid: &str) -> Option<String> {
        let id = app_id_from_str(uid).unwrap_or(0);
        if id == 0 {
            let all: Vec<&str> = self.packages.values().flat_map(|n| n.split(';')).collect();
            return guess_from_identifier(service, &all);
        }

        let names = self.packages.get(&id)?;
        let shared: Vec<&str> = names.split(';').collect();
        if shared.len() == 1 {
            return Some(names.clone());
        }
        guess_from_identifier(service, &shared).or_else(|| Some(names.clone()))
    }

    fn package_name(&self, uid: i32) -> String {
        self.get(uid)
            .map(str::to_string)
            .unwrap_or_else(|| uid.to_string())
    }
}
