use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use crate::clock::VirtualClock;
use crate::dom::{Dom, NodeId};
use crate::fixture::FixtureStore;
use crate::html::parse_html;
use crate::net::{
    Interceptor, RequestOutcome, ResponseSpec, TransportReply, UrlPattern, WaitedResponse,
};
use crate::poll::{Poll, PollOptions, poll_until};
use crate::query::Target;
use crate::queue::Command;
use crate::{Error, Result};

pub type EventHandler = Rc<dyn Fn(&mut Session, &mut EventState) -> Result<()>>;
pub type LoadHook = Rc<dyn Fn(&mut Session) -> Result<()>>;
pub type TimerHandler = Rc<dyn Fn(&mut Session) -> Result<()>>;
pub type FetchCallback = Rc<dyn Fn(&mut Session, &FetchOutcome) -> Result<()>>;
pub type WiringFn = Rc<dyn Fn(&mut Session) -> Result<()>>;
pub type Transport = Rc<dyn Fn(&str, &str) -> TransportReply>;

/// Mutable event passed through capture, target, and bubble phases.
pub struct EventState {
    pub event_type: String,
    pub target: NodeId,
    pub current_target: NodeId,
    propagation_stopped: bool,
    default_prevented: bool,
}

impl EventState {
    fn new(event_type: &str, target: NodeId) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            current_target: target,
            propagation_stopped: false,
            default_prevented: false,
        }
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}

struct ListenerEntry {
    node: NodeId,
    event: String,
    capture: bool,
    handler: EventHandler,
}

#[derive(Default)]
struct ListenerStore {
    entries: Vec<ListenerEntry>,
}

impl ListenerStore {
    fn add(&mut self, node: NodeId, event: String, capture: bool, handler: EventHandler) {
        self.entries.push(ListenerEntry {
            node,
            event,
            capture,
            handler,
        });
    }

    fn get(&self, node: NodeId, event: &str, capture: bool) -> Vec<EventHandler> {
        self.entries
            .iter()
            .filter(|entry| entry.node == node && entry.event == event && entry.capture == capture)
            .map(|entry| entry.handler.clone())
            .collect()
    }
}

#[derive(Clone)]
struct PageSpec {
    url: String,
    html: String,
    wiring: Option<WiringFn>,
}

enum FetchResolution {
    Stub { status: u16, body: Value },
    NetworkError,
    Passthrough,
}

struct PendingFetch {
    record: usize,
    method: String,
    url: String,
    resolution: FetchResolution,
    callback: FetchCallback,
}

/// Delivered to a fetch callback once the request settles. A forced
/// network error carries no status at all; an HTTP failure carries one.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: Option<u16>,
    pub body: Option<Value>,
    pub network_error: bool,
}

/// One scenario's entire world: the live document, its event listeners,
/// the network interceptor, the virtual clock, fixtures, and pending
/// effects. Nothing here is global; concurrent scenarios each own their
/// own `Session` and share nothing mutable.
pub struct Session {
    dom: Dom,
    listeners: ListenerStore,
    load_hooks: Vec<LoadHook>,
    pages: Vec<PageSpec>,
    current_url: Option<String>,
    active_element: Option<NodeId>,
    clock: VirtualClock,
    interceptor: Interceptor,
    fixtures: FixtureStore,
    pending_fetches: VecDeque<PendingFetch>,
    transport: Option<Transport>,
    rng_state: u64,
    downloads_dir: Option<PathBuf>,
    poll: PollOptions,
    last_step: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            dom: Dom::new(),
            listeners: ListenerStore::default(),
            load_hooks: Vec::new(),
            pages: Vec::new(),
            current_url: None,
            active_element: None,
            clock: VirtualClock::new(),
            interceptor: Interceptor::new(),
            fixtures: FixtureStore::new(),
            pending_fetches: VecDeque::new(),
            transport: None,
            rng_state: 0x9E37_79B9_7F4A_7C15,
            downloads_dir: None,
            poll: PollOptions::default(),
            last_step: None,
        }
    }

    pub(crate) fn dom(&self) -> &Dom {
        &self.dom
    }

    pub fn poll_options(&self) -> PollOptions {
        self.poll
    }

    pub fn set_poll_options(&mut self, opts: PollOptions) {
        self.poll = opts;
    }

    pub(crate) fn set_last_step(&mut self, step: String) {
        self.last_step = Some(step);
    }

    pub fn last_step(&self) -> Option<&str> {
        self.last_step.as_deref()
    }

    // ------------------------------------------------------------------
    // Navigation and page wiring.

    pub fn register_page(
        &mut self,
        url: impl Into<String>,
        html: impl Into<String>,
        wiring: impl Fn(&mut Session) -> Result<()> + 'static,
    ) {
        self.pages.push(PageSpec {
            url: url.into(),
            html: html.into(),
            wiring: Some(Rc::new(wiring)),
        });
    }

    pub fn register_static_page(&mut self, url: impl Into<String>, html: impl Into<String>) {
        self.pages.push(PageSpec {
            url: url.into(),
            html: html.into(),
            wiring: None,
        });
    }

    /// Fresh navigation: parses the registered markup, drops the previous
    /// document's listeners, hooks, pending fetches, and timers so nothing
    /// from the old page can fire into the new one, then runs the page
    /// wiring and its load hooks. Interceptor rules and the request log
    /// survive, as does the clock instant.
    pub fn navigate(&mut self, url: &str) -> Result<()> {
        let page = self
            .pages
            .iter()
            .find(|page| page.url == url)
            .cloned()
            .ok_or_else(|| Error::NavigationFailure(url.to_string()))?;

        debug!(url, "navigate");
        self.dom = parse_html(&page.html)?;
        self.listeners = ListenerStore::default();
        self.load_hooks.clear();
        self.active_element = None;
        self.pending_fetches.clear();
        self.clock.clear_all();
        self.current_url = Some(url.to_string());

        if let Some(wiring) = &page.wiring {
            wiring.clone()(self)?;
        }
        let hooks = self.load_hooks.clone();
        for hook in hooks {
            hook(self)?;
        }
        Ok(())
    }

    pub fn reload(&mut self) -> Result<()> {
        let url = self
            .current_url
            .clone()
            .ok_or_else(|| Error::NavigationFailure("<no page loaded>".into()))?;
        self.navigate(&url)
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    /// Registers a bubble-phase listener on every current match.
    pub fn on(
        &mut self,
        selector: &str,
        event: &str,
        handler: impl Fn(&mut Session, &mut EventState) -> Result<()> + 'static,
    ) -> Result<()> {
        self.add_listener(selector, event, false, Rc::new(handler))
    }

    pub fn on_capture(
        &mut self,
        selector: &str,
        event: &str,
        handler: impl Fn(&mut Session, &mut EventState) -> Result<()> + 'static,
    ) -> Result<()> {
        self.add_listener(selector, event, true, Rc::new(handler))
    }

    fn add_listener(
        &mut self,
        selector: &str,
        event: &str,
        capture: bool,
        handler: EventHandler,
    ) -> Result<()> {
        let nodes = self.dom.query_selector_all(selector)?;
        if nodes.is_empty() {
            return Err(Error::ElementNotFound {
                selector: selector.to_string(),
                text: None,
            });
        }
        for node in nodes {
            self.listeners
                .add(node, event.to_string(), capture, handler.clone());
        }
        Ok(())
    }

    pub fn on_load(&mut self, hook: impl Fn(&mut Session) -> Result<()> + 'static) {
        self.load_hooks.push(Rc::new(hook));
    }

    // ------------------------------------------------------------------
    // Event dispatch: capture, target, bubble.

    pub fn dispatch(&mut self, selector: &str, event: &str) -> Result<()> {
        let target = self.node_of(selector)?;
        self.dispatch_event(target, event)?;
        Ok(())
    }

    pub(crate) fn dispatch_event(&mut self, target: NodeId, event_type: &str) -> Result<EventState> {
        let mut event = EventState::new(event_type, target);

        let mut path = Vec::new();
        let mut cursor = Some(target);
        while let Some(node) = cursor {
            path.push(node);
            cursor = self.dom.parent(node);
        }
        path.reverse();
        if path.is_empty() {
            return Ok(event);
        }

        // Capture phase.
        if path.len() >= 2 {
            for node in &path[..path.len() - 1] {
                event.current_target = *node;
                self.invoke_listeners(*node, &mut event, true)?;
                if event.propagation_stopped {
                    return Ok(event);
                }
            }
        }

        // Target phase: capture listeners first, then bubble listeners.
        event.current_target = target;
        self.invoke_listeners(target, &mut event, true)?;
        if event.propagation_stopped {
            return Ok(event);
        }
        self.invoke_listeners(target, &mut event, false)?;
        if event.propagation_stopped {
            return Ok(event);
        }

        // Bubble phase.
        if path.len() >= 2 {
            for node in path[..path.len() - 1].iter().rev() {
                event.current_target = *node;
                self.invoke_listeners(*node, &mut event, false)?;
                if event.propagation_stopped {
                    return Ok(event);
                }
            }
        }
        Ok(event)
    }

    fn invoke_listeners(
        &mut self,
        node: NodeId,
        event: &mut EventState,
        capture: bool,
    ) -> Result<()> {
        let handlers = self.listeners.get(node, &event.event_type, capture);
        for handler in handlers {
            handler(self, event)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Interaction intents (node level; the command queue resolves targets).

    pub(crate) fn click_node(&mut self, target: NodeId) -> Result<()> {
        if self.dom.disabled(target) {
            return Ok(());
        }
        let outcome = self.dispatch_event(target, "click")?;
        if outcome.default_prevented() {
            return Ok(());
        }

        if self.is_input_of_type(target, "checkbox") {
            let current = self.dom.checked(target)?;
            self.dom.set_checked(target, !current)?;
            self.dispatch_event(target, "input")?;
            self.dispatch_event(target, "change")?;
        }

        if self.is_input_of_type(target, "radio") {
            let current = self.dom.checked(target)?;
            if !current {
                self.uncheck_other_radios_in_group(target)?;
                self.dom.set_checked(target, true)?;
                self.dispatch_event(target, "input")?;
                self.dispatch_event(target, "change")?;
            }
        }

        if self.is_submit_control(target) {
            if let Some(form) = self.find_ancestor_by_tag(target, "form") {
                self.dispatch_event(form, "submit")?;
            }
        }
        Ok(())
    }

    pub(crate) fn type_text_node(&mut self, target: NodeId, text: &str) -> Result<()> {
        if self.dom.disabled(target) || self.dom.readonly(target) {
            return Ok(());
        }
        let tag = self
            .dom
            .tag_name(target)
            .unwrap_or_default()
            .to_ascii_lowercase();
        if tag != "input" && tag != "textarea" {
            return Err(Error::InvalidCommand(format!(
                "type target must be input or textarea, got {tag:?}"
            )));
        }
        self.focus_node(target)?;
        self.dom.set_value(target, text)?;
        self.dispatch_event(target, "input")?;
        Ok(())
    }

    pub(crate) fn set_checked_node(&mut self, target: NodeId, checked: bool) -> Result<()> {
        if self.dom.disabled(target) {
            return Ok(());
        }
        let kind = self
            .dom
            .attr(target, "type")
            .unwrap_or_else(|| "text".into())
            .to_ascii_lowercase();
        let tag = self
            .dom
            .tag_name(target)
            .unwrap_or_default()
            .to_ascii_lowercase();
        if tag != "input" || (kind != "checkbox" && kind != "radio") {
            return Err(Error::InvalidCommand(format!(
                "check target must be input[type=checkbox|radio], got {tag}[type={kind}]"
            )));
        }

        let current = self.dom.checked(target)?;
        if current != checked {
            if kind == "radio" && checked {
                self.uncheck_other_radios_in_group(target)?;
            }
            self.dom.set_checked(target, checked)?;
            self.dispatch_event(target, "input")?;
            self.dispatch_event(target, "change")?;
        }
        Ok(())
    }

    pub(crate) fn select_values_node(&mut self, target: NodeId, values: &[String]) -> Result<()> {
        if self.dom.disabled(target) {
            return Ok(());
        }
        let before = self.dom.selected_option_values(target)?;
        self.dom.set_select_values(target, values)?;
        let after = self.dom.selected_option_values(target)?;
        if before != after {
            self.dispatch_event(target, "input")?;
            self.dispatch_event(target, "change")?;
        }
        Ok(())
    }

    pub(crate) fn upload_node(
        &mut self,
        target: NodeId,
        file_name: &str,
        drag_drop: bool,
    ) -> Result<()> {
        if !self.is_input_of_type(target, "file") {
            return Err(Error::InvalidCommand(
                "upload target must be input[type=file]".into(),
            ));
        }
        if drag_drop {
            self.dispatch_event(target, "drop")?;
        }
        self.dom.set_selected_files(target, &[file_name.to_string()])?;
        self.dispatch_event(target, "change")?;
        Ok(())
    }

    pub(crate) fn set_range_node(&mut self, target: NodeId, value: i64) -> Result<()> {
        if !self.is_input_of_type(target, "range") {
            return Err(Error::InvalidCommand(
                "range target must be input[type=range]".into(),
            ));
        }
        self.dom.set_value(target, &value.to_string())?;
        self.dispatch_event(target, "change")?;
        Ok(())
    }

    pub(crate) fn submit_node(&mut self, target: NodeId) -> Result<()> {
        let form = if self
            .dom
            .tag_name(target)
            .map(|t| t.eq_ignore_ascii_case("form"))
            .unwrap_or(false)
        {
            Some(target)
        } else {
            self.find_ancestor_by_tag(target, "form")
        };
        if let Some(form) = form {
            self.dispatch_event(form, "submit")?;
        }
        Ok(())
    }

    pub(crate) fn focus_node(&mut self, node: NodeId) -> Result<()> {
        if self.dom.disabled(node) || self.active_element == Some(node) {
            return Ok(());
        }
        if let Some(current) = self.active_element {
            self.blur_node(current)?;
        }
        self.active_element = Some(node);
        self.dispatch_event(node, "focus")?;
        Ok(())
    }

    pub(crate) fn blur_node(&mut self, node: NodeId) -> Result<()> {
        if self.active_element != Some(node) {
            return Ok(());
        }
        self.dispatch_event(node, "blur")?;
        self.active_element = None;
        Ok(())
    }

    fn is_input_of_type(&self, node: NodeId, kind: &str) -> bool {
        self.dom
            .tag_name(node)
            .map(|t| t.eq_ignore_ascii_case("input"))
            .unwrap_or(false)
            && self
                .dom
                .attr(node, "type")
                .map(|t| t.eq_ignore_ascii_case(kind))
                .unwrap_or(false)
    }

    fn is_submit_control(&self, node: NodeId) -> bool {
        let tag = self
            .dom
            .tag_name(node)
            .unwrap_or_default()
            .to_ascii_lowercase();
        match tag.as_str() {
            "button" => self
                .dom
                .attr(node, "type")
                .map(|t| !t.eq_ignore_ascii_case("button"))
                .unwrap_or(true),
            "input" => self
                .dom
                .attr(node, "type")
                .map(|t| t.eq_ignore_ascii_case("submit"))
                .unwrap_or(false),
            _ => false,
        }
    }

    fn find_ancestor_by_tag(&self, node: NodeId, tag: &str) -> Option<NodeId> {
        let mut cursor = self.dom.parent(node);
        while let Some(current) = cursor {
            if self
                .dom
                .tag_name(current)
                .map(|t| t.eq_ignore_ascii_case(tag))
                .unwrap_or(false)
            {
                return Some(current);
            }
            cursor = self.dom.parent(current);
        }
        None
    }

    fn uncheck_other_radios_in_group(&mut self, target: NodeId) -> Result<()> {
        let Some(name) = self.dom.attr(target, "name") else {
            return Ok(());
        };
        for node in self.dom.all_element_nodes() {
            if node != target
                && self.is_input_of_type(node, "radio")
                && self.dom.attr(node, "name").as_deref() == Some(&name)
            {
                self.dom.set_checked(node, false)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Network.

    pub fn intercept(
        &mut self,
        method: &str,
        url_spec: &str,
        response: ResponseSpec,
        alias: Option<&str>,
    ) -> Result<()> {
        let pattern = UrlPattern::from_spec(url_spec)?;
        self.interceptor.register(method, pattern, response, alias, true)
    }

    /// A rule that keeps matching instead of being consumed by its first hit.
    pub fn intercept_persistent(
        &mut self,
        method: &str,
        url_spec: &str,
        response: ResponseSpec,
        alias: Option<&str>,
    ) -> Result<()> {
        let pattern = UrlPattern::from_spec(url_spec)?;
        self.interceptor.register(method, pattern, response, alias, false)
    }

    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    pub fn set_transport(&mut self, transport: impl Fn(&str, &str) -> TransportReply + 'static) {
        self.transport = Some(Rc::new(transport));
    }

    /// Dispatches a page-initiated request through the intercept chain.
    /// The callback runs on a later tick once the request settles; it is
    /// never invoked re-entrantly from this call.
    pub fn fetch(
        &mut self,
        method: &str,
        url: &str,
        callback: impl Fn(&mut Session, &FetchOutcome) -> Result<()> + 'static,
    ) -> Result<()> {
        let matched = self.interceptor.match_request(method, url);
        let (resolution, alias) = match matched {
            Some((ResponseSpec::Stub { status, body }, alias)) => {
                (FetchResolution::Stub { status, body }, alias)
            }
            Some((ResponseSpec::Fixture(name), alias)) => {
                let body = self.fixtures.get(&name)?.clone();
                (FetchResolution::Stub { status: 200, body }, alias)
            }
            Some((ResponseSpec::ForceNetworkError, alias)) => (FetchResolution::NetworkError, alias),
            Some((ResponseSpec::Passthrough, alias)) => (FetchResolution::Passthrough, alias),
            None => (FetchResolution::Passthrough, None),
        };
        let record = self.interceptor.log_request(method, url, alias);
        self.pending_fetches.push_back(PendingFetch {
            record,
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            resolution,
            callback: Rc::new(callback),
        });
        Ok(())
    }

    /// Direct request outside the page, like an API smoke check. Bypasses
    /// the intercept chain and talks straight to the transport.
    pub fn request(&mut self, method: &str, url: &str) -> Result<u16> {
        let transport = self
            .transport
            .clone()
            .ok_or_else(|| Error::ForcedNetworkError(url.to_string()))?;
        match transport(method, url) {
            TransportReply::Response { status, .. } => Ok(status),
            TransportReply::Unreachable => Err(Error::ForcedNetworkError(url.to_string())),
        }
    }

    /// Blocks the calling step until a request matching `alias` has been
    /// dispatched and resolved, yielding the status code or the forced
    /// network error marker.
    pub fn wait_for_alias(&mut self, alias: &str) -> Result<WaitedResponse> {
        let opts = self.poll;
        let alias_owned = alias.to_string();
        let outcome = poll_until(self, opts, move |session| {
            Ok(match session.interceptor.resolved_for_alias(&alias_owned) {
                Some(resolved) => Poll::Ready(resolved),
                None => Poll::Pending(format!("no resolved request for alias {alias_owned}")),
            })
        })?;
        outcome.map_err(|_| Error::NetworkInterceptFailure(alias.to_string()))
    }

    /// One deterministic step of the event loop: an unfrozen clock moves
    /// by its tick step, and every fetch dispatched before this tick
    /// settles. Fetches issued by callbacks wait for the next tick.
    pub fn tick(&mut self) -> Result<usize> {
        self.clock.on_tick();
        let batch: Vec<PendingFetch> = self.pending_fetches.drain(..).collect();
        let delivered = batch.len();
        for fetch in batch {
            let outcome = self.settle_fetch(&fetch);
            (fetch.callback)(self, &outcome)?;
        }
        Ok(delivered)
    }

    fn settle_fetch(&mut self, fetch: &PendingFetch) -> FetchOutcome {
        match &fetch.resolution {
            FetchResolution::Stub { status, body } => {
                self.interceptor.resolve(fetch.record, RequestOutcome::Status(*status));
                FetchOutcome {
                    status: Some(*status),
                    body: Some(body.clone()),
                    network_error: false,
                }
            }
            FetchResolution::NetworkError => {
                self.interceptor.resolve(fetch.record, RequestOutcome::NetworkError);
                FetchOutcome {
                    status: None,
                    body: None,
                    network_error: true,
                }
            }
            FetchResolution::Passthrough => {
                let reply = self
                    .transport
                    .clone()
                    .map(|transport| transport(&fetch.method, &fetch.url))
                    .unwrap_or(TransportReply::Unreachable);
                match reply {
                    TransportReply::Response { status, body } => {
                        self.interceptor.resolve(fetch.record, RequestOutcome::Status(status));
                        FetchOutcome {
                            status: Some(status),
                            body: Some(body),
                            network_error: false,
                        }
                    }
                    TransportReply::Unreachable => {
                        self.interceptor.resolve(fetch.record, RequestOutcome::NetworkError);
                        FetchOutcome {
                            status: None,
                            body: None,
                            network_error: true,
                        }
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Clock and timers.

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn freeze_clock(&mut self, epoch_ms: i64) {
        self.clock.freeze(epoch_ms);
    }

    pub fn unfreeze_clock(&mut self, tick_step_ms: i64) {
        self.clock.unfreeze(tick_step_ms);
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn today_utc(&self) -> String {
        self.clock.today_utc()
    }

    /// Moves the pinned instant forward and runs every timer that becomes
    /// due, in `(due_at, order)` order. Time never runs ahead between
    /// explicit calls.
    pub fn advance_clock(&mut self, delta_ms: i64) -> Result<usize> {
        self.clock.advance_now(delta_ms)?;
        self.run_due_timers()
    }

    fn run_due_timers(&mut self) -> Result<usize> {
        let mut steps = 0usize;
        while let Some(task) = self.clock.take_due_task() {
            steps += 1;
            if steps > self.clock.step_limit() {
                return Err(Error::InvalidCommand(format!(
                    "timer flush exceeded {} steps (uncleared interval?)",
                    self.clock.step_limit()
                )));
            }
            self.clock.begin_task(task.id);
            let result = (task.handler.clone())(self);
            let canceled = self.clock.finish_task();
            result?;
            if let Some(interval_ms) = task.interval_ms {
                if !canceled {
                    self.clock.requeue_interval(task, interval_ms);
                }
            }
        }
        Ok(steps)
    }

    pub fn set_timeout(
        &mut self,
        delay_ms: i64,
        handler: impl Fn(&mut Session) -> Result<()> + 'static,
    ) -> i64 {
        self.clock.schedule(delay_ms, None, Rc::new(handler))
    }

    pub fn set_interval(
        &mut self,
        interval_ms: i64,
        handler: impl Fn(&mut Session) -> Result<()> + 'static,
    ) -> i64 {
        self.clock.schedule(interval_ms, Some(interval_ms), Rc::new(handler))
    }

    pub fn clear_timer(&mut self, timer_id: i64) -> bool {
        self.clock.clear(timer_id)
    }

    pub fn set_timer_step_limit(&mut self, max_steps: usize) -> Result<()> {
        self.clock.set_step_limit(max_steps)
    }

    // ------------------------------------------------------------------
    // Seeded randomness (for scenarios that pick among page options).

    pub fn set_random_seed(&mut self, seed: u64) {
        self.rng_state = if seed == 0 { 0xA5A5_A5A5_A5A5_A5A5 } else { seed };
    }

    /// Uniform pick in `lo..=hi` from the session's splitmix64 stream.
    pub fn random_in_range(&mut self, lo: usize, hi: usize) -> usize {
        let span = (hi.saturating_sub(lo) as u64).saturating_add(1);
        self.rng_state = self.rng_state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.rng_state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        lo + (z % span) as usize
    }

    // ------------------------------------------------------------------
    // Fixtures and downloads.

    pub fn add_fixture(&mut self, name: impl Into<String>, value: Value) {
        self.fixtures.insert(name, value);
    }

    pub fn load_fixture_dir(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        self.fixtures.load_dir(dir)
    }

    pub fn fixture(&self, name: &str) -> Result<&Value> {
        self.fixtures.get(name)
    }

    pub fn set_downloads_dir(&mut self, dir: impl Into<PathBuf>) {
        self.downloads_dir = Some(dir.into());
    }

    pub fn download_path(&self, name: &str) -> Result<PathBuf> {
        let dir = self
            .downloads_dir
            .as_ref()
            .ok_or_else(|| Error::Io("downloads directory not configured".into()))?;
        Ok(dir.join(name))
    }

    /// Writes a downloaded artifact byte-for-byte into the downloads dir.
    pub fn save_download(&mut self, name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.download_path(name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| Error::Io(format!("{}: {err}", parent.display())))?;
        }
        std::fs::write(&path, contents)
            .map_err(|err| Error::Io(format!("{}: {err}", path.display())))?;
        debug!(path = %path.display(), "download saved");
        Ok(path)
    }

    pub fn read_download(&self, name: &str) -> Result<String> {
        let path = self.download_path(name)?;
        std::fs::read_to_string(&path)
            .map_err(|err| Error::Io(format!("{}: {err}", path.display())))
    }

    // ------------------------------------------------------------------
    // DOM access for wiring closures and assertions.

    /// First current match, no retry. Step-level lookups should go through
    /// the command queue or `query::find` instead.
    pub fn node_of(&self, selector: &str) -> Result<NodeId> {
        self.dom
            .query_selector(selector)?
            .ok_or_else(|| Error::ElementNotFound {
                selector: selector.to_string(),
                text: None,
            })
    }

    pub fn exists(&self, selector: &str) -> Result<bool> {
        Ok(self.dom.query_selector(selector)?.is_some())
    }

    pub fn count(&self, selector: &str) -> Result<usize> {
        Ok(self.dom.query_selector_all(selector)?.len())
    }

    pub fn text_of(&self, selector: &str) -> Result<String> {
        Ok(self.dom.text_content(self.node_of(selector)?))
    }

    pub fn value_of(&self, selector: &str) -> Result<String> {
        self.dom.value(self.node_of(selector)?)
    }

    /// Effective values of a select's currently selected options.
    pub fn selected_values_of(&self, selector: &str) -> Result<Vec<String>> {
        self.dom.selected_option_values(self.node_of(selector)?)
    }

    /// Trimmed visible texts of a select's currently selected options.
    pub fn selected_texts_of(&self, selector: &str) -> Result<Vec<String>> {
        let select = self.node_of(selector)?;
        let mut options = Vec::new();
        self.dom.collect_select_options(select, &mut options);
        Ok(options
            .into_iter()
            .filter(|option| self.dom.attr(*option, "selected").is_some())
            .map(|option| self.dom.text_content(option).trim().to_string())
            .collect())
    }

    pub fn attr_of(&self, selector: &str, name: &str) -> Result<Option<String>> {
        Ok(self.dom.attr(self.node_of(selector)?, name))
    }

    pub fn set_text(&mut self, selector: &str, text: &str) -> Result<()> {
        let node = self.node_of(selector)?;
        self.dom.set_text_content(node, text)
    }

    pub fn set_attr(&mut self, selector: &str, name: &str, value: &str) -> Result<()> {
        let node = self.node_of(selector)?;
        self.dom.set_attr(node, name, value)
    }

    pub fn remove_attr(&mut self, selector: &str, name: &str) -> Result<()> {
        let node = self.node_of(selector)?;
        self.dom.remove_attr(node, name)
    }

    pub fn show(&mut self, selector: &str) -> Result<()> {
        self.remove_attr(selector, "hidden")
    }

    pub fn hide(&mut self, selector: &str) -> Result<()> {
        self.set_attr(selector, "hidden", "true")
    }

    pub fn remove(&mut self, selector: &str) -> Result<()> {
        let node = self.node_of(selector)?;
        self.dom.remove_node(node)
    }

    pub fn clear_children(&mut self, selector: &str) -> Result<()> {
        let node = self.node_of(selector)?;
        self.dom.set_text_content(node, "")
    }

    /// Parses `html` as a fragment and appends it to the first match.
    pub fn append_html(&mut self, selector: &str, html: &str) -> Result<()> {
        let node = self.node_of(selector)?;
        let fragment = parse_html(html)?;
        self.dom.append_fragment(node, &fragment)
    }

    // Node-level reads for event handlers and element handles.

    pub fn node_text(&self, node: NodeId) -> String {
        self.dom.text_content(node)
    }

    pub fn node_value(&self, node: NodeId) -> Result<String> {
        self.dom.value(node)
    }

    pub fn node_attr(&self, node: NodeId, name: &str) -> Option<String> {
        self.dom.attr(node, name)
    }

    pub fn node_checked(&self, node: NodeId) -> Result<bool> {
        self.dom.checked(node)
    }

    pub fn node_selected_files(&self, node: NodeId) -> Vec<String> {
        self.dom.selected_files(node)
    }

    pub fn node_visible(&self, node: NodeId) -> bool {
        self.dom.visible(node)
    }

    /// Truncated markup dump of a node, for failure diagnostics.
    pub fn node_snippet(&self, node: NodeId) -> String {
        self.dom.node_snippet(node)
    }

    /// Texts of the selectable (non-disabled) options of a select, in
    /// visible order. The 1-based indices line up with `SelectChoice::Index`.
    pub fn selectable_option_texts(&self, selector: &str) -> Result<Vec<String>> {
        let select = self.node_of(selector)?;
        let mut options = Vec::new();
        self.dom.collect_select_options(select, &mut options);
        Ok(options
            .into_iter()
            .filter(|option| !self.dom.disabled(*option))
            .map(|option| self.dom.text_content(option).trim().to_string())
            .collect())
    }

    pub(crate) fn selectable_options(&self, select: NodeId) -> Vec<NodeId> {
        let mut options = Vec::new();
        self.dom.collect_select_options(select, &mut options);
        options
            .into_iter()
            .filter(|option| !self.dom.disabled(*option))
            .collect()
    }

    // ------------------------------------------------------------------
    // Step execution.

    /// Executes a single command as a step, recording its description for
    /// failure reports.
    pub fn perform(&mut self, command: Command) -> Result<()> {
        self.set_last_step(command.describe());
        debug!(step = %command.describe(), "perform");
        command.execute(self)
    }

    /// Retrying assertion as a step.
    pub fn expect(&mut self, target: &Target, predicate: &crate::assert::Predicate) -> Result<()> {
        self.set_last_step(format!(
            "expect {} to {}",
            target.describe(),
            predicate.describe()
        ));
        crate::assert::expect(self, target, predicate)
    }
}
