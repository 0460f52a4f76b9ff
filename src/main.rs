//! Area XRender Compositor
//!
//! Compositing manager for X11 built on the RENDER extension. Windows are
//! redirected off-screen, composited into a back buffer and presented on the
//! composite overlay window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::Event;
use x11rb::protocol::composite::{self, ConnectionExt as CompositeExt};
use x11rb::protocol::damage::{self, ConnectionExt as DamageExt};
use x11rb::protocol::shape::{self, ConnectionExt as ShapeExt, SK, SO};
use x11rb::protocol::xfixes::{self, ConnectionExt as XFixesExt};
use x11rb::protocol::xproto::{
    AtomEnum, ChangeWindowAttributesAux, ClipOrdering, ConnectionExt as _, EventMask,
};
use x11rb::rust_connection::RustConnection;

use area_xrender::backend::XRenderBackend;
use area_xrender::config::Config;
use area_xrender::effects::Repaint;
use area_xrender::effects::invert::InvertEffect;
use area_xrender::events::{EventTranslator, SceneEvent, Translation, X11WindowSource};
use area_xrender::shortcuts::{KeyboardMapping, ShortcutAction, ShortcutMap};
use area_xrender::x11_async::X11EventStream;
use area_xrender::{Region, Scene, ScreenPaintData, WindowId};

/// Frame deadline that survives loop iterations
///
/// The first damage after a frame arms the deadline; later damage never
/// pushes it back, so a steady event stream can't starve rendering.
struct FramePacer {
    interval: Duration,
    deadline: Option<Instant>,
}

impl FramePacer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    fn schedule(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.interval);
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn frame_done(&mut self) {
        self.deadline = None;
    }
}

/// Main application state
struct CompositorApp {
    conn: Arc<RustConnection>,
    x11_stream: X11EventStream,
    root: u32,
    active_window_atom: u32,
    scene: Scene<XRenderBackend>,
    translator: EventTranslator<X11WindowSource>,
    shortcuts: ShortcutMap,
    /// Damage objects of tracked windows
    damage_objects: HashMap<WindowId, u32>,
    /// Screen area to repaint on the next frame
    damage: Region,
    zoom: f32,
    config: Config,
}

impl CompositorApp {
    fn new(config: Config) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None)
            .context("Failed to connect to X server")?;
        let conn = Arc::new(conn);
        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let (width, height) = (screen.width_in_pixels as u32, screen.height_in_pixels as u32);

        Self::init_extensions(&conn)?;

        conn.composite_redirect_subwindows(root, composite::Redirect::MANUAL)?
            .check()
            .context("Failed to redirect windows (another compositor running?)")?;

        let overlay = conn
            .composite_get_overlay_window(root)?
            .reply()?
            .overlay_win;
        info!("Using Composite Overlay Window: {}", overlay);

        // Make overlay window input-transparent so events pass through to root
        conn.shape_rectangles(SO::SET, SK::INPUT, ClipOrdering::UNSORTED, overlay, 0, 0, &[])?;

        let root_mask = EventMask::SUBSTRUCTURE_NOTIFY | EventMask::STRUCTURE_NOTIFY;
        conn.change_window_attributes(root, &ChangeWindowAttributesAux::new().event_mask(root_mask))?
            .check()
            .context("Failed to select root window events")?;

        let opacity_atom = conn.intern_atom(false, b"_NET_WM_WINDOW_OPACITY")?.reply()?.atom;
        let active_window_atom = conn.intern_atom(false, b"_NET_ACTIVE_WINDOW")?.reply()?.atom;

        let backend = XRenderBackend::new(conn.clone(), screen_num, overlay)?;
        let formats = backend.visual_formats().clone();
        let mut scene = Scene::new(backend, width, height, config.scene_options())
            .context("Failed to initialize XRender scene")?;
        if config.invert.enabled {
            let invert = InvertEffect::for_backend(scene.backend());
            scene.effects_mut().add(Box::new(invert));
        }

        let source = X11WindowSource::new(
            conn.clone(),
            formats,
            opacity_atom,
            config.transparency.default_opacity,
        );
        let mut translator = EventTranslator::new(source, root, opacity_atom);
        translator.ignore(overlay);

        let mapping = KeyboardMapping::query(&conn)?;
        let shortcuts = ShortcutMap::grab(&conn, root, &mapping, &config.shortcut_bindings())?;
        info!("Grabbed {} shortcuts", shortcuts.len());

        let x11_stream = X11EventStream::new(conn.clone())?;

        let mut app = Self {
            conn,
            x11_stream,
            root,
            active_window_atom,
            scene,
            translator,
            shortcuts,
            damage_objects: HashMap::new(),
            damage: Region::new(),
            zoom: 1.0,
            config,
        };

        let children = app.conn.query_tree(root)?.reply()?.children;
        let adopted = app.translator.adopt(&children);
        info!("Adopted {} existing windows", adopted.events.len());
        app.apply_translation(adopted);
        app.damage_screen();

        Ok(app)
    }

    fn init_extensions(conn: &RustConnection) -> Result<()> {
        let _composite_info = conn
            .extension_information(composite::X11_EXTENSION_NAME)?
            .context("Composite extension not available")?;
        let composite_version = conn
            .composite_query_version(0, 4)?
            .reply()
            .context("Failed to query composite version")?;
        info!(
            "Composite extension {}.{}",
            composite_version.major_version, composite_version.minor_version
        );

        // Damage regions are XFixes regions, negotiate XFixes first
        let _xfixes_info = conn
            .extension_information(xfixes::X11_EXTENSION_NAME)?
            .context("XFixes extension not available")?;
        conn.xfixes_query_version(5, 0)?
            .reply()
            .context("Failed to query XFixes version")?;

        let _damage_info = conn
            .extension_information(damage::X11_EXTENSION_NAME)?
            .context("Damage extension not available")?;
        let damage_version = conn
            .damage_query_version(1, 1)?
            .reply()
            .context("Failed to query damage version")?;
        info!(
            "Damage extension {}.{}",
            damage_version.major_version, damage_version.minor_version
        );

        let _shape_info = conn
            .extension_information(shape::X11_EXTENSION_NAME)?
            .context("Shape extension not available")?;
        conn.shape_query_version()?.reply()?;

        Ok(())
    }

    fn damage_screen(&mut self) {
        self.damage = Region::from_rect(self.scene.screen());
    }

    fn apply_translation(&mut self, translation: Translation) {
        for event in &translation.events {
            match *event {
                SceneEvent::WindowAdded(id) => self.track_window(id),
                SceneEvent::WindowDeleted(id) => {
                    // Already gone if the window was destroyed; a reparented
                    // window still holds it
                    if let Some(damage) = self.damage_objects.remove(&id) {
                        let _ = self.conn.damage_destroy(damage);
                    }
                }
                _ => {}
            }
            self.scene.handle_event(event);
        }
        if let Some((width, height)) = translation.screen_resized {
            self.scene.resize(width, height);
            self.scene.backend_mut().set_screen_size(width, height);
            self.damage_screen();
        }
        self.damage = self.damage.union(&translation.damage);
    }

    /// Start receiving damage, shape and property events for a window
    fn track_window(&mut self, id: WindowId) {
        if self.damage_objects.contains_key(&id) {
            return;
        }
        let conn = self.conn.as_ref();
        let aux = ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE);
        if let Err(e) = conn.change_window_attributes(id.0, &aux) {
            warn!("Failed to select property events on window {}: {}", id, e);
        }
        if let Err(e) = conn.shape_select_input(id.0, true) {
            warn!("Failed to select shape events on window {}: {}", id, e);
        }
        let damage = match conn.generate_id() {
            Ok(damage) => damage,
            Err(e) => {
                warn!("Failed to generate damage ID for window {}: {}", id, e);
                return;
            }
        };
        match conn.damage_create(damage, id.0, damage::ReportLevel::NON_EMPTY) {
            Ok(_) => {
                debug!("Created damage object {} for window {}", damage, id);
                self.damage_objects.insert(id, damage);
            }
            Err(e) => warn!("Failed to create damage for window {}: {}", id, e),
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::KeyPress(e) => {
                if let Some(action) = self.shortcuts.lookup(u16::from(e.state), e.detail) {
                    self.run_shortcut(action, e.root_x as i32, e.root_y as i32);
                }
            }
            Event::Error(e) => {
                // Mostly requests racing with destroyed windows
                debug!("X11 error: {:?}", e);
            }
            event => {
                let translation = self.translator.translate(&event);
                if !translation.is_empty() {
                    self.apply_translation(translation);
                }
            }
        }
    }

    fn run_shortcut(&mut self, action: ShortcutAction, x: i32, y: i32) {
        debug!("Shortcut: {:?}", action);
        let step = self.config.zoom.step.max(1.01);
        match action {
            ShortcutAction::ZoomIn => self.set_zoom(self.zoom * step, x, y),
            ShortcutAction::ZoomOut => self.set_zoom(self.zoom / step, x, y),
            ShortcutAction::ZoomReset => self.set_zoom(1.0, x, y),
            ShortcutAction::InvertScreen
            | ShortcutAction::InvertScreenPlusHue
            | ShortcutAction::InvertWindow
            | ShortcutAction::InvertWindowPlusHue => {
                let active = self.active_window();
                let Some(invert) = self.scene.effects_mut().get_mut::<InvertEffect>() else {
                    return;
                };
                let repaint = match action {
                    ShortcutAction::InvertScreen => invert.toggle_screen_inversion(),
                    ShortcutAction::InvertScreenPlusHue => invert.toggle_screen_inversion_plus_hue(),
                    ShortcutAction::InvertWindow => invert.toggle_window_inversion(active),
                    _ => invert.toggle_window_inversion_plus_hue(active),
                };
                self.repaint(repaint);
            }
        }
    }

    fn set_zoom(&mut self, zoom: f32, x: i32, y: i32) {
        let zoom = zoom.clamp(1.0, self.config.zoom.max.max(1.0));
        self.zoom = zoom;
        let data = if zoom == 1.0 {
            ScreenPaintData::default()
        } else {
            ScreenPaintData::zoom_at(zoom, x, y)
        };
        self.scene.set_screen_transform(data);
        self.damage_screen();
    }

    fn repaint(&mut self, repaint: Repaint) {
        match repaint {
            Repaint::None => {}
            Repaint::Full => self.damage_screen(),
            Repaint::Window(id) => {
                if let Some(window) = self.translator.registry().get(id) {
                    self.damage.add_rect(window.geometry);
                }
            }
        }
    }

    /// Top-level window holding `_NET_ACTIVE_WINDOW`
    fn active_window(&self) -> Option<WindowId> {
        let conn = self.conn.as_ref();
        let reply = conn
            .get_property(false, self.root, self.active_window_atom, AtomEnum::WINDOW, 0, 1)
            .ok()?
            .reply()
            .ok()?;
        let mut window = reply.value32()?.next().filter(|&w| w != x11rb::NONE)?;

        // The WM may have reparented the client into a frame
        for _ in 0..32 {
            let tree = conn.query_tree(window).ok()?.reply().ok()?;
            if tree.parent == self.root || tree.parent == x11rb::NONE {
                return Some(WindowId(window));
            }
            window = tree.parent;
        }
        None
    }

    fn render(&mut self) {
        // Acknowledge damage before painting so anything drawn meanwhile is reported again
        for &damage in self.damage_objects.values() {
            let _ = self.conn.damage_subtract(damage, x11rb::NONE, x11rb::NONE);
        }

        let windows = self.translator.registry().paint_order();
        match self.scene.paint(&self.damage, &windows) {
            Ok(stats) => {
                if stats.skipped > 0 {
                    debug!("Frame painted {} windows, skipped {}", stats.painted, stats.skipped);
                } else {
                    trace!("Frame painted {} windows", stats.painted);
                }
            }
            Err(e) => warn!("Frame failed: {}", e),
        }
        self.damage = Region::new();
    }

    /// Main event loop
    async fn run(&mut self) -> Result<()> {
        let frame_interval = Duration::from_millis(self.config.compositor.frame_interval_ms.max(1));
        info!("Entering main loop (frame interval {:?})", frame_interval);
        let mut pacer = FramePacer::new(frame_interval);

        loop {
            // Flush X11 requests at start of loop (batch optimization)
            self.x11_stream.flush().context("X11 connection lost")?;

            for event in self.x11_stream.drain().context("X11 connection lost")? {
                self.handle_event(event);
            }
            if !self.damage.is_empty() {
                pacer.schedule(Instant::now());
            }
            let deadline = pacer.deadline();

            tokio::select! {
                () = self.x11_stream.wait_readable() => {}

                // Damage arriving before the deadline joins the same frame
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.render();
                    pacer.frame_done();
                }
            }
        }
    }

    fn shutdown(&self) {
        info!("Releasing composite redirection");
        let conn = self.conn.as_ref();
        let _ = conn.composite_unredirect_subwindows(self.root, composite::Redirect::MANUAL);
        let _ = conn.composite_release_overlay_window(self.root);
        let _ = conn.flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "area_xrender=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Area XRender compositor");

    let config = Config::load().unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {:#}", e);
        Config::default()
    });

    let mut app = CompositorApp::new(config)?;

    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let result = tokio::select! {
        result = app.run() => result,
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully");
            Ok(())
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully");
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("Application error: {:#}", e);
    }
    app.shutdown();
    result
}
