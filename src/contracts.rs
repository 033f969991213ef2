//! External collaborators named but not implemented by this crate (spec §1
//! "Explicitly out of scope", §4.6 "External contracts"). Each is expressed
//! as a trait so the coordination core can be exercised against fakes in
//! tests and wired to a real browser transport by a downstream crate.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::ids::{DocumentId, FrameId, World};
use crate::progress::Progress;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A handle to a live DOM element, produced by [`SelectorEngine`] or
/// [`ExecutionContext::evaluate_handle_internal`]. Disposal is explicit
/// (spec §5 "element handles ... are released on both success and all
/// failure paths").
#[async_trait]
pub trait ElementHandle: Send + Sync + fmt::Debug {
    /// The world this handle's remote object lives in.
    fn world(&self) -> World;

    /// Runs one element action against the node this handle resolved to.
    /// Raises [`CoreError::NotConnected`](crate::error::CoreError::NotConnected)
    /// if the node was removed from the DOM between resolution and the call
    /// (spec §4.4.1.e); the retry-with-selector loop absorbs exactly that
    /// error and re-resolves the selector.
    async fn perform(&self, action: &ElementAction) -> Result<ActionOutcome>;

    /// Releases the remote object. Idempotent.
    async fn dispose(&self) -> Result<()>;
}

/// One element action, as named by spec §4.4's action row. Carried as data
/// (rather than one trait method per verb) so the retry-with-selector loop
/// in [`Frame`](crate::frame::Frame) stays a single generic algorithm instead
/// of being duplicated per action.
#[derive(Debug, Clone)]
pub enum ElementAction {
    Click(ClickOptions),
    DblClick(ClickOptions),
    Fill(String),
    Focus,
    Hover,
    Check,
    Uncheck,
    SelectOption(Vec<String>),
    SetInputFiles(Vec<std::path::PathBuf>),
    Type(String),
    Press(String),
    TextContent,
    InnerText,
    InnerHtml,
    GetAttribute(String),
}

impl ElementAction {
    /// Actions sourced as `'input'` (spec §4.6 `input_action_epilogue`,
    /// §4.1): the ones a real pointer/keyboard dispatch could itself trigger
    /// a navigation for, and so must be wrapped in a signal-barrier wait.
    pub fn is_input_sourced(&self) -> bool {
        matches!(
            self,
            ElementAction::Click(_)
                | ElementAction::DblClick(_)
                | ElementAction::Check
                | ElementAction::Uncheck
                | ElementAction::SelectOption(_)
                | ElementAction::SetInputFiles(_)
                | ElementAction::Type(_)
                | ElementAction::Press(_)
                | ElementAction::Hover
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ElementAction::Click(_) => "click",
            ElementAction::DblClick(_) => "dblclick",
            ElementAction::Fill(_) => "fill",
            ElementAction::Focus => "focus",
            ElementAction::Hover => "hover",
            ElementAction::Check => "check",
            ElementAction::Uncheck => "uncheck",
            ElementAction::SelectOption(_) => "selectOption",
            ElementAction::SetInputFiles(_) => "setInputFiles",
            ElementAction::Type(_) => "type",
            ElementAction::Press(_) => "press",
            ElementAction::TextContent => "textContent",
            ElementAction::InnerText => "innerText",
            ElementAction::InnerHtml => "innerHTML",
            ElementAction::GetAttribute(_) => "getAttribute",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClickOptions {
    pub button: Option<String>,
    pub click_count: u32,
    pub modifiers: Vec<String>,
}

/// What an [`ElementHandle::perform`] call produced. Most actions produce
/// nothing; the text-extraction actions return their string (or `None` when
/// the element lacks the requested attribute).
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Done,
    Text(Option<String>),
}

/// The concrete handle to a live JavaScript world (spec glossary). Created
/// and destroyed by the browser independently of the frame's lifetime.
#[async_trait]
pub trait ExecutionContext: Send + Sync + fmt::Debug {
    fn world(&self) -> World;

    /// Evaluates `expression` with at most one argument value, returning the
    /// raw JSON result (spec §4.4 `evaluate`: "at most two user arguments";
    /// the function itself plus `arg` is the second).
    async fn evaluate_internal(&self, expression: &str, arg: Option<JsonValue>) -> Result<JsonValue>;

    /// As above, but returns a handle to the resulting remote object instead
    /// of serializing it.
    async fn evaluate_handle_internal(
        &self,
        expression: &str,
        arg: Option<JsonValue>,
    ) -> Result<Arc<dyn ElementHandle>>;

    /// Returns a handle to the page-side injected script used for polling
    /// (selector waits, `waitForFunction`).
    fn injected_script(&self) -> InjectedScriptHandle;

    /// Builds and awaits the injected-script poll for `waitForFunction`
    /// (spec §4.4 `waitForFunction`, §1 non-goal: "does not implement the
    /// injected-script poll loop that lives in the page" — the loop itself
    /// is this method's job on the real implementation, not the core's).
    async fn wait_for_function(
        &self,
        expression: &str,
        arg: Option<JsonValue>,
        polling: Polling,
    ) -> Result<JsonValue>;
}

/// `waitForFunction`'s `polling` option (spec §4.4, §6): either the literal
/// `'raf'` (poll once per animation frame) or a positive millisecond
/// interval.
#[derive(Debug, Copy, Clone)]
pub enum Polling {
    Raf,
    Interval(std::time::Duration),
}

impl Polling {
    pub fn parse(value: &JsonValue) -> Result<Self> {
        match value {
            JsonValue::String(s) if s == "raf" => Ok(Polling::Raf),
            JsonValue::Number(n) => {
                let ms = n.as_f64().unwrap_or(0.0);
                if ms > 0.0 {
                    Ok(Polling::Interval(std::time::Duration::from_secs_f64(ms / 1000.0)))
                } else {
                    Err(crate::error::CoreError::invalid_argument(
                        "`polling` must be a positive number of milliseconds or 'raf'",
                    ))
                }
            }
            _ => Err(crate::error::CoreError::invalid_argument(
                "`polling` must be a positive number of milliseconds or 'raf'",
            )),
        }
    }
}

/// Opaque reference to the page-side polling helper (spec glossary
/// "Injected script"). The core never inspects it — it is only threaded
/// through to [`SchedulableTask`] implementations.
#[derive(Debug, Clone)]
pub struct InjectedScriptHandle {
    pub context: World,
}

/// `attached | detached | visible | hidden` (spec §4.4 `waitForSelector`,
/// §6 "Accepted wait-for-selector states").
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SelectorState {
    Attached,
    Detached,
    Visible,
    Hidden,
}

impl SelectorState {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "attached" => Ok(SelectorState::Attached),
            "detached" => Ok(SelectorState::Detached),
            "visible" => Ok(SelectorState::Visible),
            "hidden" => Ok(SelectorState::Hidden),
            _ => Err(crate::error::CoreError::invalid_argument(format!(
                "unknown selector state '{s}'"
            ))),
        }
    }
}

impl Default for SelectorState {
    fn default() -> Self {
        SelectorState::Visible
    }
}

/// A callback re-invoked once per execution context the
/// [`RerunnableTask`](crate::frame::rerunnable::RerunnableTask) it backs is
/// bound to (spec §3 "Rerunnable Task": "user-supplied builder that, given
/// an execution context, returns an InjectedScriptPoll handle"). The
/// `Progress` handle lets the built poll forward cancellation into the
/// page.
pub type PollBuilder<T> =
    Arc<dyn Fn(Arc<dyn ExecutionContext>, Progress) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Compiles a selector string into schedulable work (spec §4.6). Resolution
/// helpers (`$`, `$$`) are eager; wait helpers return a `PollBuilder` meant
/// to back a `RerunnableTask` so they survive execution-context recycling.
#[async_trait]
pub trait SelectorEngine: Send + Sync {
    async fn query(&self, frame: &FrameId, selector: &str) -> Result<Option<Arc<dyn ElementHandle>>>;

    async fn query_all(&self, frame: &FrameId, selector: &str) -> Result<Vec<Arc<dyn ElementHandle>>>;

    /// `$eval`: evaluates `expression(element, arg)` in the main world
    /// against the first match of `selector`.
    async fn eval(
        &self,
        frame: &FrameId,
        selector: &str,
        expression: &str,
        arg: Option<JsonValue>,
    ) -> Result<JsonValue>;

    /// `$$eval`: evaluates `expression(elements, arg)` against every match.
    async fn eval_all(
        &self,
        frame: &FrameId,
        selector: &str,
        expression: &str,
        arg: Option<JsonValue>,
    ) -> Result<JsonValue>;

    /// Dispatches a DOM event on the first match of `selector`.
    async fn dispatch_event(
        &self,
        frame: &FrameId,
        selector: &str,
        event_type: &str,
        event_init: Option<JsonValue>,
    ) -> Result<()>;

    /// Returns the world the task prefers and a builder that resolves (or
    /// clears, for `detached`/`hidden` with no element) a handle for
    /// `selector` in the given `state`.
    fn wait_for_selector_task(
        &self,
        frame: &FrameId,
        selector: &str,
        state: SelectorState,
    ) -> Result<(World, PollBuilder<Option<Arc<dyn ElementHandle>>>)>;
}

/// The outcome of asking the delegate to navigate a frame (spec §4.4
/// `goto`). A present `new_document_id` means the navigation will commit a
/// new document; its absence means same-document (or no-op).
#[derive(Debug, Clone)]
pub struct NavigateOutcome {
    pub new_document_id: Option<DocumentId>,
}

/// The browser transport collaborator (spec §4.6). Its concrete
/// implementation lives in a browser-specific crate; this core only calls
/// through the trait.
#[async_trait]
pub trait PageDelegate: Send + Sync {
    /// Issues the navigation and reports whether it will commit a new
    /// document.
    async fn navigate_frame(
        &self,
        frame: &FrameId,
        url: &str,
        referer: Option<&str>,
    ) -> Result<NavigateOutcome>;

    /// Returns the `<iframe>` element hosting `frame` in its parent
    /// document (spec §4.4 `frameElement`).
    async fn get_frame_element(&self, frame: &FrameId) -> Result<Arc<dyn ElementHandle>>;

    /// Adopts `handle` (resolved in some world) into `target_world`,
    /// producing an equivalent handle there (spec §4.4 `waitForSelector`).
    async fn adopt_element_handle(
        &self,
        handle: Arc<dyn ElementHandle>,
        target_world: World,
    ) -> Result<Arc<dyn ElementHandle>>;

    /// Awaited after every action sourced as `'input'`, before the signal
    /// barrier is asked to wait (spec §4.6).
    async fn input_action_epilogue(&self) -> Result<()>;

    /// Governs whether `addScriptTag`/`addStyleTag` with inline `content`
    /// must perform an extra round trip to observe CSP errors, since some
    /// browsers report them asynchronously relative to the evaluate call
    /// (spec §4.6).
    fn csp_errors_asynchronous_for_inline_scripts(&self) -> bool;

    /// The page's `extraHTTPHeaders['referer']`, if set, used to detect a
    /// conflicting `referer` argument to `goto` (spec §4.4 `goto`).
    fn extra_http_referer(&self) -> Option<String>;
}

/// Matches a committed or requested URL against a caller-supplied pattern
/// (spec §4.2 "URL matching"): absent (matches all), an exact literal, a
/// glob with `*` wildcards, or an arbitrary predicate.
#[derive(Clone)]
pub enum UrlMatcher {
    Any,
    Exact(String),
    Glob(String),
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl Default for UrlMatcher {
    fn default() -> Self {
        UrlMatcher::Any
    }
}

impl fmt::Debug for UrlMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlMatcher::Any => write!(f, "UrlMatcher::Any"),
            UrlMatcher::Exact(s) => write!(f, "UrlMatcher::Exact({s:?})"),
            UrlMatcher::Glob(s) => write!(f, "UrlMatcher::Glob({s:?})"),
            UrlMatcher::Predicate(_) => write!(f, "UrlMatcher::Predicate(..)"),
        }
    }
}

impl UrlMatcher {
    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlMatcher::Any => true,
            UrlMatcher::Exact(expected) => expected == url,
            UrlMatcher::Glob(pattern) => glob_match(pattern, url),
            UrlMatcher::Predicate(pred) => pred(url),
        }
    }
}

/// Minimal `*`-wildcard glob matcher (no `**`/character classes): `*`
/// matches any run of characters, everything else must match literally.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(pattern: &[u8], text: &[u8]) -> bool {
        match pattern.first() {
            None => text.is_empty(),
            Some(b'*') => {
                // try consuming 0..=N characters of text for this '*'
                (0..=text.len()).any(|i| inner(&pattern[1..], &text[i..]))
            }
            Some(&c) => !text.is_empty() && text[0] == c && inner(&pattern[1..], &text[1..]),
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matcher() {
        assert!(glob_match("https://a.com/*", "https://a.com/x/y"));
        assert!(glob_match("*.com/path", "foo.com/path"));
        assert!(!glob_match("https://a.com/*", "https://b.com/x"));
        assert!(glob_match("https://a.com/", "https://a.com/"));
    }

    #[test]
    fn url_matcher_any_matches_everything() {
        assert!(UrlMatcher::Any.matches("anything"));
    }
}
