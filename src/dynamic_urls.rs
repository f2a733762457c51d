// ── PassGFW Dynamic-URL Handler (C8) ───────────────────────────────────────
// Applies server-supplied add/remove/navigate directives from a signed,
// nonce-matched response (spec §4.8). Because the response was signature-
// verified by the time these directives reach this module, they are trusted
// to mutate the persistent store without further checks.

use std::collections::HashSet;

use crate::model::{CandidateEntry, Method};
use crate::platform::BrowserOpener;
use crate::store::CandidateStore;

/// Apply every directive in order. `opened` is the resolver's per-process
/// "already navigated" set (spec §5 `openedNavigateURLs`) — shared with the
/// main pass's own `navigate` handling so a URL is never opened twice in one
/// process lifetime (spec §4.7, §8.1 property 6).
pub async fn apply_directives(
    store: &CandidateStore,
    browser: &dyn BrowserOpener,
    opened: &mut HashSet<String>,
    directives: &[CandidateEntry],
) {
    for directive in directives {
        match &directive.method {
            Method::Remove => {
                store.remove(&directive.url).await;
            }
            Method::Api | Method::File if directive.store => {
                store.add(directive.clone()).await;
            }
            Method::Api | Method::File => {
                // store=false directives are not persisted — discovery only.
            }
            Method::Navigate => {
                if opened.insert(directive.url.clone()) {
                    browser.open(&directive.url);
                }
            }
            Method::Unknown(method) => {
                log::warn!("[dynamic-urls] ignoring directive with unknown method '{method}'");
            }
        }
    }
}
