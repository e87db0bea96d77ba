use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bevy::prelude::*;

use super::attribution::join_attributions;
use super::engine::{CameraView, EngineEvent, EngineInit, PayloadPlugin, TileEngineFactory, TileStreamEngine};
use super::TileGroup;
use crate::config::{clamp_secs, TilesConfig};
use crate::error::TileStreamError;
use crate::materials::{subtree, MaterialNormalizer};
use crate::shadows::buildings::stop_building_shadows;
use crate::tags::TileTags;
use crate::url_session::UrlSessionResolver;

/// Something the session wants reported upward.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamNotice {
    LoadFailed(TileStreamError),
    Progress(u8),
    Complete,
    Attributions(String),
    TileCount(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadPolling {
    Idle,
    Polling {
        elapsed: Duration,
        last_percent: Option<u8>,
    },
    Done,
}

/// One tile streaming session: the engine, its URL resolver and the
/// housekeeping that runs around the engine step.
#[derive(Resource)]
pub struct TileStreamSession {
    factory: Arc<dyn TileEngineFactory>,
    settings: TilesConfig,
    normalizer: MaterialNormalizer,
    engine: Option<Box<dyn TileStreamEngine>>,
    resolver: UrlSessionResolver,
    group: Option<Entity>,
    use_normalized_material: bool,
    location: Option<(f64, f64)>,
    polling: LoadPolling,
    refresh_timer: Timer,
    frame: u64,
    loaded_tiles: HashSet<Entity>,
    tile_count: usize,
    /// Time since attributions were last recomputed; `None` until the first pass
    attribution_age: Option<Duration>,
    attributions: String,
    notices: Vec<StreamNotice>,
}

impl TileStreamSession {
    pub fn new(factory: Arc<dyn TileEngineFactory>, settings: TilesConfig) -> Self {
        Self {
            factory,
            normalizer: MaterialNormalizer::new(settings.material.clone()),
            use_normalized_material: settings.use_normalized_material,
            refresh_timer: Timer::from_seconds(clamp_secs(settings.material_refresh_secs), TimerMode::Repeating),
            settings,
            engine: None,
            resolver: UrlSessionResolver::default(),
            group: None,
            location: None,
            polling: LoadPolling::Idle,
            frame: 0,
            loaded_tiles: HashSet::new(),
            tile_count: 0,
            attribution_age: None,
            attributions: String::new(),
            notices: Vec::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    pub fn is_polling(&self) -> bool {
        matches!(self.polling, LoadPolling::Polling { .. })
    }

    pub fn group(&self) -> Option<Entity> {
        self.group
    }

    pub fn tile_count(&self) -> usize {
        self.tile_count
    }

    pub fn attributions(&self) -> &str {
        &self.attributions
    }

    pub fn use_normalized_material(&self) -> bool {
        self.use_normalized_material
    }

    pub fn resolver(&self) -> &UrlSessionResolver {
        &self.resolver
    }

    pub fn settings(&self) -> &TilesConfig {
        &self.settings
    }

    /// Start streaming from `root_endpoint`. Calling this on a running
    /// session does nothing and returns the existing group.
    pub fn initialize(
        &mut self,
        world: &mut World,
        root_endpoint: &str,
        api_key: &str,
    ) -> Result<Entity, TileStreamError> {
        if let (Some(_), Some(group)) = (&self.engine, self.group) {
            debug!("Tile stream already initialized, ignoring");
            return Ok(group);
        }

        let group = world
            .spawn((
                Name::new("Tile Stream"),
                TileGroup,
                Transform::default(),
                Visibility::default(),
            ))
            .id();

        let init = EngineInit {
            root_endpoint: root_endpoint.to_string(),
            api_key: api_key.to_string(),
            group,
        };
        let mut engine = match self.factory.create(&init) {
            Ok(engine) => engine,
            Err(e) => {
                world.despawn(group);
                return Err(e);
            }
        };

        for plugin in PayloadPlugin::ALL {
            engine.register_plugin(plugin);
        }
        if let Some((latitude, longitude)) = self.location {
            engine.set_lat_lon_position(latitude, longitude);
        }

        self.resolver = UrlSessionResolver::new(api_key);
        self.engine = Some(engine);
        self.group = Some(group);
        self.polling = LoadPolling::Polling {
            elapsed: Duration::ZERO,
            last_percent: None,
        };
        self.refresh_timer.reset();

        info!("Tile stream initialized from {}", root_endpoint);
        Ok(group)
    }

    /// One frame of streaming.
    pub fn update(&mut self, world: &mut World, delta: Duration, camera: Option<CameraView>) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        engine.update(world, camera.as_ref(), &mut self.resolver);
        let events = engine.drain_events();

        for event in events {
            self.handle_event(world, event);
        }

        self.poll_progress(delta);

        self.frame += 1;
        if let Some(age) = self.attribution_age.as_mut() {
            *age += delta;
        }
        if self.frame % self.settings.stats_every_frames.max(1) == 0 {
            self.update_stats(world);
        }

        self.refresh_timer.tick(delta);
        if self.refresh_timer.just_finished() {
            self.refresh_materials(world);
        }
    }

    fn handle_event(&mut self, world: &mut World, event: EngineEvent) {
        match event {
            EngineEvent::TileLoaded(tile) => {
                self.loaded_tiles.insert(tile);
                if self.use_normalized_material {
                    with_tags(world, |world, tags| self.normalizer.normalize(world, tags, tile));
                }
            }
            EngineEvent::TileUnloaded(tile) => {
                self.loaded_tiles.remove(&tile);
                with_tags(world, |world, tags| {
                    tags.forget(tile);
                    for entity in subtree(world, tile) {
                        tags.forget(entity);
                    }
                });
            }
            EngineEvent::TileSetLoaded => {
                if let (true, Some(group)) = (self.use_normalized_material, self.group) {
                    with_tags(world, |world, tags| self.normalizer.refresh(world, tags, group));
                }
            }
            EngineEvent::LoadError(e) => {
                warn!("Tile load error: {}", e);
                self.notices.push(StreamNotice::LoadFailed(e));
            }
        }
    }

    fn poll_progress(&mut self, delta: Duration) {
        let Some(engine) = self.engine.as_ref() else {
            return;
        };
        let ready = engine.root_tile_set_ready();
        let progress = engine.load_progress();

        let LoadPolling::Polling { elapsed, last_percent } = &mut self.polling else {
            return;
        };
        *elapsed += delta;

        if ready {
            if *last_percent != Some(100) {
                self.notices.push(StreamNotice::Progress(100));
            }
            self.notices.push(StreamNotice::Complete);
            info!("Root tile set loaded after {:.1}s", elapsed.as_secs_f32());
            self.polling = LoadPolling::Done;
            return;
        }

        // 100% is reserved for a ready root tile set
        let percent = if progress.is_finite() {
            (progress.clamp(0.0, 1.0) * 100.0).round().min(99.0) as u8
        } else {
            0
        };
        if *last_percent != Some(percent) {
            *last_percent = Some(percent);
            self.notices.push(StreamNotice::Progress(percent));
        }

        let timeout = clamp_secs(self.settings.load_timeout_secs);
        if elapsed.as_secs_f32() >= timeout {
            warn!("Root tile set not ready after {:.0}s, giving up on progress", timeout);
            self.notices
                .push(StreamNotice::LoadFailed(TileStreamError::Timeout { secs: timeout }));
            self.polling = LoadPolling::Done;
        }
    }

    fn update_stats(&mut self, world: &World) {
        self.loaded_tiles.retain(|&tile| world.get_entity(tile).is_ok());
        let count = self.loaded_tiles.len();
        if count != self.tile_count {
            self.tile_count = count;
            self.notices.push(StreamNotice::TileCount(count));
        }

        let interval = Duration::from_secs_f32(clamp_secs(self.settings.attribution_interval_secs));
        let due = self.attribution_age.is_none_or(|age| age >= interval);
        if !due {
            return;
        }
        let Some(engine) = self.engine.as_ref() else {
            return;
        };
        self.attribution_age = Some(Duration::ZERO);
        let joined = join_attributions(&engine.attributions());
        if joined != self.attributions {
            debug!("Tile attributions: {}", joined);
            self.attributions = joined.clone();
            self.notices.push(StreamNotice::Attributions(joined));
        }
    }

    /// Catch meshes that arrived without a load event, then drop tags for
    /// entities that no longer exist.
    fn refresh_materials(&mut self, world: &mut World) {
        let group = self.group;
        let normalize = self.use_normalized_material;
        with_tags(world, |world, tags| {
            if let (true, Some(group)) = (normalize, group) {
                self.normalizer.refresh(world, tags, group);
            }
            let dropped = tags.retain_live(|entity| world.get_entity(entity).is_ok());
            if dropped > 0 {
                debug!("Dropped {} stale tile tag(s)", dropped);
            }
        });
    }

    /// Turning normalization on re-tags and renormalizes every tile. Turning
    /// it off only stops future normalization.
    pub fn set_use_normalized_material(&mut self, world: &mut World, enabled: bool) {
        if self.use_normalized_material == enabled {
            return;
        }
        self.use_normalized_material = enabled;
        info!("Normalized tile material {}", if enabled { "enabled" } else { "disabled" });
        if enabled {
            self.force_update_materials(world);
        }
    }

    /// Re-tag and renormalize the whole tile group.
    pub fn force_update_materials(&mut self, world: &mut World) {
        let Some(group) = self.group else {
            return;
        };
        if !self.use_normalized_material {
            debug!("Material normalization disabled, skipping forced update");
            return;
        }
        let count = with_tags(world, |world, tags| {
            self.normalizer.reset_and_renormalize(world, tags, group)
        });
        debug!("Renormalized {} tile mesh(es)", count);
    }

    pub fn set_lat_lon_position(&mut self, latitude: f64, longitude: f64) {
        self.location = Some((latitude, longitude));
        if let Some(engine) = self.engine.as_mut() {
            engine.set_lat_lon_position(latitude, longitude);
        }
    }

    /// Tear the session down, building shadow receivers included. Safe on a
    /// session that never initialized.
    pub fn dispose(&mut self, world: &mut World) {
        self.polling = LoadPolling::Idle;
        self.refresh_timer.reset();

        stop_building_shadows(world);

        if let Some(mut engine) = self.engine.take() {
            engine.dispose(world);
        }
        if let Some(group) = self.group.take() {
            if let Ok(entity) = world.get_entity_mut(group) {
                entity.despawn();
            }
        }
        if let Some(mut tags) = world.get_resource_mut::<TileTags>() {
            tags.clear();
        }

        let was_active = self.resolver.cached_len() > 0 || self.resolver.session_token().is_some();
        self.resolver.clear();
        self.loaded_tiles.clear();
        self.tile_count = 0;
        self.frame = 0;
        self.attribution_age = None;
        self.attributions.clear();
        self.notices.clear();

        if was_active {
            info!("Tile stream disposed");
        }
    }

    pub fn take_notices(&mut self) -> Vec<StreamNotice> {
        std::mem::take(&mut self.notices)
    }
}

fn with_tags<R>(world: &mut World, f: impl FnOnce(&mut World, &mut TileTags) -> R) -> R {
    if !world.contains_resource::<TileTags>() {
        world.init_resource::<TileTags>();
    }
    world.resource_scope(|world, mut tags: Mut<TileTags>| f(world, &mut tags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShadowConfig;
    use crate::shadows::{BuildingShadowSynthesizer, ShadowReceiverGroup};
    use crate::stream::engine::Attribution;
    use crate::tags::Stage;
    use crate::url_session::UrlPreprocessor;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Script {
        created: usize,
        fetch: Vec<String>,
        fetched: Vec<String>,
        spawn_tiles: usize,
        spawned: Vec<Entity>,
        meshes: Vec<Entity>,
        errors: Vec<TileStreamError>,
        ready: bool,
        progress: f32,
        attributions: Vec<Attribution>,
        attribution_reads: usize,
        plugins: Vec<PayloadPlugin>,
        location: Option<(f64, f64)>,
        disposed: bool,
    }

    struct ScriptedEngine {
        script: Arc<Mutex<Script>>,
        group: Entity,
        events: Vec<EngineEvent>,
    }

    impl TileStreamEngine for ScriptedEngine {
        fn register_plugin(&mut self, plugin: PayloadPlugin) {
            self.script.lock().unwrap().plugins.push(plugin);
        }

        fn set_lat_lon_position(&mut self, latitude: f64, longitude: f64) {
            self.script.lock().unwrap().location = Some((latitude, longitude));
        }

        fn update(&mut self, world: &mut World, _camera: Option<&CameraView>, urls: &mut dyn UrlPreprocessor) {
            let mut script = self.script.lock().unwrap();
            let fetch = std::mem::take(&mut script.fetch);
            for url in fetch {
                let resolved = urls.preprocess(&url);
                script.fetched.push(resolved);
            }
            for _ in 0..std::mem::take(&mut script.spawn_tiles) {
                let tile = world.spawn(ChildOf(self.group)).id();
                let mesh = spawn_mesh(world, tile);
                script.spawned.push(tile);
                script.meshes.push(mesh);
                self.events.push(EngineEvent::TileLoaded(tile));
            }
            for error in script.errors.drain(..) {
                self.events.push(EngineEvent::LoadError(error));
            }
        }

        fn drain_events(&mut self) -> Vec<EngineEvent> {
            std::mem::take(&mut self.events)
        }

        fn root_tile_set_ready(&self) -> bool {
            self.script.lock().unwrap().ready
        }

        fn load_progress(&self) -> f32 {
            self.script.lock().unwrap().progress
        }

        fn attributions(&self) -> Vec<Attribution> {
            let mut script = self.script.lock().unwrap();
            script.attribution_reads += 1;
            script.attributions.clone()
        }

        fn dispose(&mut self, _world: &mut World) {
            self.script.lock().unwrap().disposed = true;
        }
    }

    fn spawn_mesh(world: &mut World, parent: Entity) -> Entity {
        let material = world
            .resource_mut::<Assets<StandardMaterial>>()
            .add(StandardMaterial::default());
        world
            .spawn((Mesh3d(Handle::default()), MeshMaterial3d(material), ChildOf(parent)))
            .id()
    }

    fn setup(settings: TilesConfig) -> (World, TileStreamSession, Arc<Mutex<Script>>) {
        let mut world = World::new();
        world.init_resource::<Assets<StandardMaterial>>();
        world.init_resource::<TileTags>();

        let script = Arc::new(Mutex::new(Script::default()));
        let shared = Arc::clone(&script);
        let factory = move |init: &EngineInit| -> Result<Box<dyn TileStreamEngine>, TileStreamError> {
            shared.lock().unwrap().created += 1;
            Ok(Box::new(ScriptedEngine {
                script: Arc::clone(&shared),
                group: init.group,
                events: Vec::new(),
            }))
        };
        let session = TileStreamSession::new(Arc::new(factory), settings);
        (world, session, script)
    }

    const FRAME: Duration = Duration::from_millis(16);

    #[test]
    fn test_initialize_sets_up_engine_once() {
        let (mut world, mut session, script) = setup(TilesConfig::default());
        session.set_lat_lon_position(48.85, 2.35);

        let group = session.initialize(&mut world, "https://tiles.test/root.json", "k").unwrap();
        assert!(world.get::<TileGroup>(group).is_some());
        assert!(session.is_polling());
        {
            let script = script.lock().unwrap();
            assert_eq!(script.plugins, PayloadPlugin::ALL.to_vec());
            assert_eq!(script.location, Some((48.85, 2.35)));
        }

        let again = session.initialize(&mut world, "https://tiles.test/root.json", "k").unwrap();
        assert_eq!(again, group);
        assert_eq!(script.lock().unwrap().created, 1);
    }

    #[test]
    fn test_failed_engine_start_leaves_no_group() {
        let mut world = World::new();
        let factory = |_: &EngineInit| -> Result<Box<dyn TileStreamEngine>, TileStreamError> {
            Err(TileStreamError::EngineStart("no gpu".to_string()))
        };
        let mut session = TileStreamSession::new(Arc::new(factory), TilesConfig::default());

        let result = session.initialize(&mut world, "https://tiles.test/root.json", "k");
        assert_eq!(result, Err(TileStreamError::EngineStart("no gpu".to_string())));
        assert!(!session.is_initialized());
        assert_eq!(world.query::<&TileGroup>().iter(&world).count(), 0);
    }

    #[test]
    fn test_engine_fetches_through_resolver() {
        let (mut world, mut session, script) = setup(TilesConfig::default());
        session.initialize(&mut world, "https://tiles.test/root.json", "k").unwrap();
        script.lock().unwrap().fetch = vec![
            "https://tiles.test/root.json?session=s1".to_string(),
            "https://tiles.test/a.glb".to_string(),
        ];

        session.update(&mut world, FRAME, None);

        let script = script.lock().unwrap();
        assert_eq!(script.fetched[0], "https://tiles.test/root.json?session=s1&key=k");
        assert_eq!(script.fetched[1], "https://tiles.test/a.glb?key=k&session=s1");
        assert_eq!(session.resolver().session_token(), Some("s1"));
    }

    #[test]
    fn test_loaded_tiles_are_normalized() {
        let (mut world, mut session, script) = setup(TilesConfig::default());
        session.initialize(&mut world, "https://tiles.test/root.json", "k").unwrap();
        script.lock().unwrap().spawn_tiles = 2;

        session.update(&mut world, FRAME, None);

        let tags = world.resource::<TileTags>();
        for tile in script.lock().unwrap().spawned.iter() {
            assert!(tags.is_processed(*tile, Stage::Material));
        }
    }

    #[test]
    fn test_disabled_normalization_leaves_tiles_alone() {
        let settings = TilesConfig {
            use_normalized_material: false,
            ..default()
        };
        let (mut world, mut session, script) = setup(settings);
        session.initialize(&mut world, "https://tiles.test/root.json", "k").unwrap();
        script.lock().unwrap().spawn_tiles = 1;

        session.update(&mut world, FRAME, None);
        assert!(world.resource::<TileTags>().is_empty());
    }

    #[test]
    fn test_load_error_is_reported_and_stream_continues() {
        let (mut world, mut session, script) = setup(TilesConfig::default());
        session.initialize(&mut world, "https://tiles.test/root.json", "k").unwrap();
        let error = TileStreamError::Load {
            url: "https://tiles.test/bad.glb".to_string(),
            reason: "404".to_string(),
        };
        script.lock().unwrap().errors.push(error.clone());

        session.update(&mut world, FRAME, None);
        assert!(session.take_notices().contains(&StreamNotice::LoadFailed(error)));

        script.lock().unwrap().spawn_tiles = 1;
        session.update(&mut world, FRAME, None);
        let tile = script.lock().unwrap().spawned[0];
        assert!(world.resource::<TileTags>().is_processed(tile, Stage::Material));
    }

    #[test]
    fn test_progress_reported_on_change_until_complete() {
        let (mut world, mut session, script) = setup(TilesConfig::default());
        session.initialize(&mut world, "https://tiles.test/root.json", "k").unwrap();

        script.lock().unwrap().progress = 0.4;
        session.update(&mut world, FRAME, None);
        assert_eq!(session.take_notices(), vec![StreamNotice::Progress(40)]);

        session.update(&mut world, FRAME, None);
        assert!(session.take_notices().is_empty());

        script.lock().unwrap().ready = true;
        session.update(&mut world, FRAME, None);
        assert_eq!(
            session.take_notices(),
            vec![StreamNotice::Progress(100), StreamNotice::Complete]
        );
        assert!(!session.is_polling());

        session.update(&mut world, FRAME, None);
        assert!(session.take_notices().is_empty());
    }

    #[test]
    fn test_progress_polling_times_out() {
        let settings = TilesConfig {
            load_timeout_secs: 1.0,
            ..default()
        };
        let (mut world, mut session, _script) = setup(settings);
        session.initialize(&mut world, "https://tiles.test/root.json", "k").unwrap();

        session.update(&mut world, Duration::from_millis(600), None);
        assert!(session.is_polling());
        session.update(&mut world, Duration::from_millis(600), None);
        assert!(!session.is_polling());
        assert!(session
            .take_notices()
            .contains(&StreamNotice::LoadFailed(TileStreamError::Timeout { secs: 1.0 })));
    }

    #[test]
    fn test_stats_are_throttled() {
        let settings = TilesConfig {
            stats_every_frames: 3,
            attribution_interval_secs: 10.0,
            ..default()
        };
        let (mut world, mut session, script) = setup(settings);
        session.initialize(&mut world, "https://tiles.test/root.json", "k").unwrap();
        {
            let mut script = script.lock().unwrap();
            script.spawn_tiles = 2;
            script.attributions = vec![Attribution::new("Google; Landsat"), Attribution::new("Google")];
        }

        session.update(&mut world, FRAME, None);
        session.update(&mut world, FRAME, None);
        assert!(!session
            .take_notices()
            .iter()
            .any(|n| matches!(n, StreamNotice::TileCount(_))));

        session.update(&mut world, FRAME, None);
        let notices = session.take_notices();
        assert!(notices.contains(&StreamNotice::TileCount(2)));
        assert!(notices.contains(&StreamNotice::Attributions("Google; Landsat".to_string())));
        assert_eq!(script.lock().unwrap().attribution_reads, 1);

        // Next stats pass is inside the attribution interval
        for _ in 0..3 {
            session.update(&mut world, FRAME, None);
        }
        assert_eq!(script.lock().unwrap().attribution_reads, 1);

        // Past the interval
        for _ in 0..3 {
            session.update(&mut world, Duration::from_secs(4), None);
        }
        assert_eq!(script.lock().unwrap().attribution_reads, 2);
    }

    #[test]
    fn test_refresh_timer_catches_late_meshes_and_drops_dead_tags() {
        let settings = TilesConfig {
            material_refresh_secs: 1.0,
            ..default()
        };
        let (mut world, mut session, script) = setup(settings);
        let group = session.initialize(&mut world, "https://tiles.test/root.json", "k").unwrap();
        script.lock().unwrap().spawn_tiles = 1;
        session.update(&mut world, FRAME, None);

        let tile = script.lock().unwrap().spawned[0];
        let late = spawn_mesh(&mut world, tile);
        let doomed = world.spawn(ChildOf(group)).id();
        world.resource_mut::<TileTags>().mark(doomed, Stage::Shadow);
        world.despawn(doomed);

        session.update(&mut world, Duration::from_secs(1), None);
        let tags = world.resource::<TileTags>();
        assert!(tags.is_processed(late, Stage::Material));
        assert!(!tags.is_processed(doomed, Stage::Shadow));
    }

    #[test]
    fn test_enabling_normalization_renormalizes_everything() {
        let settings = TilesConfig {
            use_normalized_material: false,
            ..default()
        };
        let (mut world, mut session, script) = setup(settings);
        session.initialize(&mut world, "https://tiles.test/root.json", "k").unwrap();
        script.lock().unwrap().spawn_tiles = 1;
        session.update(&mut world, FRAME, None);
        let mesh = script.lock().unwrap().meshes[0];
        let original = world.get::<MeshMaterial3d<StandardMaterial>>(mesh).unwrap().0.clone();

        session.set_use_normalized_material(&mut world, true);
        assert!(world.resource::<TileTags>().is_processed(mesh, Stage::Material));
        let normalized = world.get::<MeshMaterial3d<StandardMaterial>>(mesh).unwrap().0.clone();
        assert_ne!(normalized, original);

        // Disabling keeps what was already normalized
        session.set_use_normalized_material(&mut world, false);
        assert!(world.resource::<TileTags>().is_processed(mesh, Stage::Material));
        assert_eq!(world.get::<MeshMaterial3d<StandardMaterial>>(mesh).unwrap().0, normalized);
    }

    #[test]
    fn test_dispose_before_initialize_is_safe() {
        let (mut world, mut session, script) = setup(TilesConfig::default());
        session.dispose(&mut world);
        assert!(!session.is_initialized());
        assert!(!session.is_polling());
        assert_eq!(script.lock().unwrap().created, 0);
    }

    #[test]
    fn test_dispose_tears_everything_down() {
        let (mut world, mut session, script) = setup(TilesConfig::default());
        let group = session.initialize(&mut world, "https://tiles.test/root.json", "k").unwrap();
        {
            let mut script = script.lock().unwrap();
            script.fetch = vec!["https://tiles.test/root.json?session=s1".to_string()];
            script.spawn_tiles = 1;
        }
        session.update(&mut world, FRAME, None);

        session.dispose(&mut world);
        assert!(world.get_entity(group).is_err());
        assert!(script.lock().unwrap().disposed);
        assert_eq!(session.resolver().session_token(), None);
        assert_eq!(session.resolver().cached_len(), 0);
        assert!(world.resource::<TileTags>().is_empty());
        assert!(!session.is_polling());

        // A fresh session can start after dispose
        session.initialize(&mut world, "https://tiles.test/root.json", "k").unwrap();
        assert_eq!(script.lock().unwrap().created, 2);
    }

    #[test]
    fn test_dispose_stops_building_shadows() {
        let (mut world, mut session, _script) = setup(TilesConfig::default());
        let group = session.initialize(&mut world, "https://tiles.test/root.json", "k").unwrap();

        let mut synthesizer = BuildingShadowSynthesizer::new(&ShadowConfig::default());
        synthesizer.watch(Some(group));
        let receivers = world.spawn(ShadowReceiverGroup).id();
        synthesizer.set_receiver_group(receivers);
        world.insert_resource(synthesizer);

        session.dispose(&mut world);
        assert!(world.get_entity(receivers).is_err());
        let synthesizer = world.resource::<BuildingShadowSynthesizer>();
        assert!(!synthesizer.is_running());
        assert_eq!(synthesizer.receiver_group(), None);
    }
}
