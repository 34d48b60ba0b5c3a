//! Whitelist list model: filtered, sorted application records.
//!
//! A model is built wholesale from a package snapshot and the persisted
//! whitelist set, and rebuilt wholesale on the next load. The only in-place
//! mutation is the `whitelisted` flip driven by the user.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::inventory::{Certificate, PackageInfo};

/// One row of the whitelist list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRecord {
    pub title: String,
    pub package_name: String,
    pub enabled: bool,
    pub whitelisted: bool,
    pub uid: u32,
}

/// Filtering knobs for [`build_app_list`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppListOptions {
    /// Include packages flagged as system packages. Off by default.
    pub show_system_apps: bool,
}

/// Build the ordered record list for the whitelist screen.
///
/// Packages signed with `platform_cert` are always hidden so the user cannot
/// exempt the platform's own trust anchor; when the certificate is unknown
/// that filter is skipped. System packages are hidden unless
/// [`AppListOptions::show_system_apps`] is set.
///
/// Enabled apps sort before disabled ones, then by title ignoring case. The
/// sort is stable, so identical titles keep snapshot order.
pub fn build_app_list(
    packages: Vec<PackageInfo>,
    platform_cert: Option<&Certificate>,
    whitelist: &BTreeSet<String>,
    options: AppListOptions,
) -> Vec<AppRecord> {
    let mut apps: Vec<AppRecord> = packages
        .into_iter()
        .filter(|pkg| !signed_with(pkg, platform_cert))
        .filter(|pkg| options.show_system_apps || !pkg.is_system)
        .map(|pkg| AppRecord {
            whitelisted: whitelist.contains(&pkg.package_name),
            title: pkg.title,
            package_name: pkg.package_name,
            enabled: pkg.enabled,
            uid: pkg.uid,
        })
        .collect();

    apps.sort_by(compare_records);
    apps
}

fn signed_with(pkg: &PackageInfo, platform_cert: Option<&Certificate>) -> bool {
    match (platform_cert, &pkg.signing_certificate) {
        (Some(platform), Some(cert)) => platform == cert,
        _ => false,
    }
}

fn compare_records(lhs: &AppRecord, rhs: &AppRecord) -> Ordering {
    // `true` sorts first
    rhs.enabled
        .cmp(&lhs.enabled)
        .then_with(|| compare_ignore_case(&lhs.title, &rhs.title))
}

/// Case-insensitive, char-by-char title comparison.
pub fn compare_ignore_case(lhs: &str, rhs: &str) -> Ordering {
    let l = lhs.chars().flat_map(char::to_lowercase);
    let r = rhs.chars().flat_map(char::to_lowercase);
    l.cmp(r)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(name: &str, title: &str, enabled: bool) -> PackageInfo {
        PackageInfo {
            package_name: name.to_string(),
            title: title.to_string(),
            enabled,
            uid: 10_000,
            is_system: false,
            signing_certificate: Some(Certificate::new(b"user".to_vec())),
        }
    }

    fn names(apps: &[AppRecord]) -> Vec<&str> {
        apps.iter().map(|a| a.package_name.as_str()).collect()
    }

    #[test]
    fn enabled_before_disabled_then_title_ignoring_case() {
        let packages = vec![
            pkg("A", "Banana", true),
            pkg("B", "apple", true),
            pkg("C", "Cherry", false),
        ];
        let apps = build_app_list(packages, None, &BTreeSet::new(), AppListOptions::default());
        assert_eq!(names(&apps), vec!["B", "A", "C"]);
    }

    #[test]
    fn disabled_app_with_early_title_still_sorts_last() {
        let packages = vec![pkg("z", "Zebra", true), pkg("a", "aardvark", false)];
        let apps = build_app_list(packages, None, &BTreeSet::new(), AppListOptions::default());
        assert_eq!(names(&apps), vec!["z", "a"]);
    }

    #[test]
    fn platform_signed_packages_hidden() {
        let platform = Certificate::new(b"platform".to_vec());
        let mut settings = pkg("com.android.settings", "Settings", true);
        settings.signing_certificate = Some(platform.clone());
        let packages = vec![settings, pkg("org.example", "Example", true)];

        let apps = build_app_list(
            packages,
            Some(&platform),
            &BTreeSet::new(),
            AppListOptions::default(),
        );
        assert_eq!(names(&apps), vec!["org.example"]);
    }

    #[test]
    fn unknown_platform_certificate_fails_open() {
        let mut settings = pkg("com.android.settings", "Settings", true);
        settings.signing_certificate = Some(Certificate::new(b"platform".to_vec()));
        let apps = build_app_list(
            vec![settings],
            None,
            &BTreeSet::new(),
            AppListOptions::default(),
        );
        assert_eq!(apps.len(), 1);
    }

    #[test]
    fn unsigned_package_not_matched_against_platform() {
        let platform = Certificate::new(b"platform".to_vec());
        let mut unsigned = pkg("org.unsigned", "Unsigned", true);
        unsigned.signing_certificate = None;
        let apps = build_app_list(
            vec![unsigned],
            Some(&platform),
            &BTreeSet::new(),
            AppListOptions::default(),
        );
        assert_eq!(apps.len(), 1);
    }

    #[test]
    fn system_packages_hidden_by_default() {
        let mut system = pkg("com.android.phone", "Phone", true);
        system.is_system = true;
        let packages = vec![system, pkg("org.example", "Example", true)];

        let hidden = build_app_list(
            packages.clone(),
            None,
            &BTreeSet::new(),
            AppListOptions::default(),
        );
        assert_eq!(names(&hidden), vec!["org.example"]);

        let shown = build_app_list(
            packages,
            None,
            &BTreeSet::new(),
            AppListOptions {
                show_system_apps: true,
            },
        );
        assert_eq!(names(&shown), vec!["org.example", "com.android.phone"]);
    }

    #[test]
    fn whitelisted_flag_reflects_persisted_set() {
        let whitelist: BTreeSet<String> = ["B".to_string()].into_iter().collect();
        let packages = vec![pkg("A", "Alpha", true), pkg("B", "Beta", true)];
        let apps = build_app_list(packages, None, &whitelist, AppListOptions::default());
        assert!(!apps[0].whitelisted);
        assert!(apps[1].whitelisted);
    }

    #[test]
    fn empty_snapshot_yields_empty_list() {
        let apps = build_app_list(vec![], None, &BTreeSet::new(), AppListOptions::default());
        assert!(apps.is_empty());
    }

    #[test]
    fn titles_non_decreasing_within_groups() {
        let packages = vec![
            pkg("1", "delta", true),
            pkg("2", "Alpha", false),
            pkg("3", "charlie", true),
            pkg("4", "BRAVO", true),
            pkg("5", "", true),
            pkg("6", "echo", false),
        ];
        let apps = build_app_list(packages, None, &BTreeSet::new(), AppListOptions::default());
        let split = apps.iter().position(|a| !a.enabled).unwrap();
        assert!(apps[split..].iter().all(|a| !a.enabled));
        for group in [&apps[..split], &apps[split..]] {
            for pair in group.windows(2) {
                assert_ne!(
                    compare_ignore_case(&pair[0].title, &pair[1].title),
                    Ordering::Greater
                );
            }
        }
        // Untitled apps sort to the front of their group
        assert_eq!(apps[0].package_name, "5");
    }
}
