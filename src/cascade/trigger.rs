//! Trigger classification.
//!
//! Maps semantic invalidation triggers to the external hook names that raise
//! them. The engine never consults this table; routing collaborators do.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const HOOK_CONTENT_UPDATED: &str = "post/content_updated";
pub const HOOK_VISIBILITY_CHANGED: &str = "post/visibility_changed";
pub const HOOK_FIELDS_SAVED: &str = "fields/saved";
pub const HOOK_MIGRATION_COMPLETE: &str = "migration/complete";
pub const HOOK_DEPLOYMENT_COMPLETE: &str = "deployment/complete";
pub const HOOK_CLEAR_ALL: &str = "cache/clear_all";
pub const HOOK_BEFORE_PAGE_CACHE_CLEAN: &str = "page_cache/before_clean";
pub const HOOK_AFTER_PAGE_CACHE_CLEAN: &str = "page_cache/after_clean";

/// Semantic trigger families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTrigger {
    PostDeployment,
    ContentChange,
    ManualClear,
    BeforePageCacheClean,
    AfterPageCacheClean,
}

impl CacheTrigger {
    pub const ALL: [CacheTrigger; 5] = [
        CacheTrigger::PostDeployment,
        CacheTrigger::ContentChange,
        CacheTrigger::ManualClear,
        CacheTrigger::BeforePageCacheClean,
        CacheTrigger::AfterPageCacheClean,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheTrigger::PostDeployment => "post_deployment",
            CacheTrigger::ContentChange => "content_change",
            CacheTrigger::ManualClear => "manual_clear",
            CacheTrigger::BeforePageCacheClean => "before_page_cache_clean",
            CacheTrigger::AfterPageCacheClean => "after_page_cache_clean",
        }
    }

    /// External hooks that represent this trigger.
    pub fn hooks(self) -> &'static [&'static str] {
        match self {
            CacheTrigger::PostDeployment => &[HOOK_DEPLOYMENT_COMPLETE],
            CacheTrigger::ContentChange => &[
                HOOK_CONTENT_UPDATED,
                HOOK_VISIBILITY_CHANGED,
                HOOK_FIELDS_SAVED,
                HOOK_MIGRATION_COMPLETE,
            ],
            CacheTrigger::ManualClear => &[HOOK_CLEAR_ALL],
            CacheTrigger::BeforePageCacheClean => &[HOOK_BEFORE_PAGE_CACHE_CLEAN],
            CacheTrigger::AfterPageCacheClean => &[HOOK_AFTER_PAGE_CACHE_CLEAN],
        }
    }

    /// Reverse lookup from a hook name.
    pub fn for_hook(hook: &str) -> Option<CacheTrigger> {
        Self::ALL
            .into_iter()
            .find(|trigger| trigger.hooks().contains(&hook))
    }
}

/// Concrete signals a collaborator can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSignal {
    ContentUpdated,
    VisibilityChanged,
    FieldsSaved,
    MigrationComplete,
    DeploymentComplete,
    ClearAll,
    BeforePageCacheClean,
    AfterPageCacheClean,
}

impl CacheSignal {
    pub const ALL: [CacheSignal; 8] = [
        CacheSignal::ContentUpdated,
        CacheSignal::VisibilityChanged,
        CacheSignal::FieldsSaved,
        CacheSignal::MigrationComplete,
        CacheSignal::DeploymentComplete,
        CacheSignal::ClearAll,
        CacheSignal::BeforePageCacheClean,
        CacheSignal::AfterPageCacheClean,
    ];

    pub fn hook(self) -> &'static str {
        match self {
            CacheSignal::ContentUpdated => HOOK_CONTENT_UPDATED,
            CacheSignal::VisibilityChanged => HOOK_VISIBILITY_CHANGED,
            CacheSignal::FieldsSaved => HOOK_FIELDS_SAVED,
            CacheSignal::MigrationComplete => HOOK_MIGRATION_COMPLETE,
            CacheSignal::DeploymentComplete => HOOK_DEPLOYMENT_COMPLETE,
            CacheSignal::ClearAll => HOOK_CLEAR_ALL,
            CacheSignal::BeforePageCacheClean => HOOK_BEFORE_PAGE_CACHE_CLEAN,
            CacheSignal::AfterPageCacheClean => HOOK_AFTER_PAGE_CACHE_CLEAN,
        }
    }

    pub fn trigger(self) -> CacheTrigger {
        CacheTrigger::for_hook(self.hook()).unwrap_or(CacheTrigger::ManualClear)
    }
}

impl fmt::Display for CacheSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hook())
    }
}

impl FromStr for CacheSignal {
    type Err = String;

    /// Accepts either the hook name or the snake_case signal name.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|signal| {
                signal.hook() == value
                    || serde_json::to_value(signal)
                        .ok()
                        .and_then(|name| name.as_str().map(|name| name == value))
                        .unwrap_or(false)
            })
            .ok_or_else(|| format!("unknown cache signal `{value}`"))
    }
}
