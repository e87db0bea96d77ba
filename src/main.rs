use bevy::input::mouse::{MouseMotion, MouseWheel};
use bevy::prelude::*;

use sunlit_tiles::config::{AppConfig, ConfigPlugin};
use sunlit_tiles::demo::ProceduralCityFactory;
use sunlit_tiles::shadows::{BuildingShadowSynthesizer, SceneClock, ShadowOpacitySynchronizer, SunLight};
use sunlit_tiles::stream::{
    TileAttributionsChanged, TileCountChanged, TileLoadComplete, TileLoadFailed, TileLoadProgress,
    TileStreamCommand, TileStreamSession,
};
use sunlit_tiles::SunlitTilesPlugin;

const ORBIT_SENSITIVITY: f32 = 0.3;
const ZOOM_SENSITIVITY: f32 = 0.1;
const MIN_DISTANCE: f32 = 40.0;
const MAX_DISTANCE: f32 = 800.0;
const HOUR_STEP: f32 = 0.5;

/// Orbit camera around the scene origin
#[derive(Resource)]
struct OrbitCamera {
    yaw: f32,
    pitch: f32,
    distance: f32,
}

impl Default for OrbitCamera {
    fn default() -> Self {
        Self {
            yaw: 30.0,
            pitch: 35.0,
            distance: 260.0,
        }
    }
}

impl OrbitCamera {
    fn transform(&self) -> Transform {
        let yaw = self.yaw.to_radians();
        let pitch = self.pitch.to_radians();
        let offset = Vec3::new(
            yaw.sin() * pitch.cos(),
            pitch.sin(),
            yaw.cos() * pitch.cos(),
        ) * self.distance;
        Transform::from_translation(offset).looking_at(Vec3::ZERO, Vec3::Y)
    }
}

/// What the status overlay shows
#[derive(Resource, Default)]
struct StreamStatus {
    progress: u8,
    complete: bool,
    tiles: usize,
    attributions: String,
    last_error: Option<String>,
}

#[derive(Component)]
struct StatusText;

#[derive(Component)]
struct AttributionText;

fn main() {
    App::new()
        .add_plugins((
            DefaultPlugins.set(WindowPlugin {
                primary_window: Some(Window {
                    title: "Sunlit Tiles".to_string(),
                    resolution: (1280, 720).into(),
                    ..default()
                }),
                ..default()
            }),
            ConfigPlugin,
        ))
        .add_plugins(SunlitTilesPlugin::new(ProceduralCityFactory))
        .init_resource::<OrbitCamera>()
        .init_resource::<StreamStatus>()
        .add_systems(Startup, (setup_scene, setup_ui, start_streaming))
        .add_systems(
            Update,
            (
                handle_camera_controls,
                handle_keyboard,
                collect_stream_messages,
                update_status_text.after(collect_stream_messages),
            ),
        )
        .run();
}

fn setup_scene(mut commands: Commands, orbit: Res<OrbitCamera>) {
    commands.spawn((Camera3d::default(), orbit.transform()));

    commands.spawn((
        DirectionalLight {
            illuminance: 10_000.0,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_xyz(0.0, 1000.0, 0.0).looking_at(Vec3::ZERO, Vec3::Y),
        SunLight,
    ));

    commands.insert_resource(GlobalAmbientLight {
        color: Color::srgb(0.85, 0.9, 1.0),
        brightness: 300.0,
        ..default()
    });
}

fn start_streaming(config: Res<AppConfig>, mut commands: MessageWriter<TileStreamCommand>) {
    commands.write(TileStreamCommand::SetLatLon {
        latitude: config.location.latitude,
        longitude: config.location.longitude,
    });
    commands.write(TileStreamCommand::initialize_from(&config.tiles));
}

fn setup_ui(mut commands: Commands) {
    commands.spawn((
        Text::new("Loading tiles..."),
        Node {
            position_type: PositionType::Absolute,
            top: Val::Px(10.0),
            left: Val::Px(10.0),
            padding: UiRect::all(Val::Px(5.0)),
            ..default()
        },
        BackgroundColor(Color::srgba(0.0, 0.0, 0.0, 0.5)),
        StatusText,
    ));

    commands.spawn((
        Text::new(""),
        TextFont {
            font_size: 12.0,
            ..default()
        },
        Node {
            position_type: PositionType::Absolute,
            bottom: Val::Px(5.0),
            right: Val::Px(5.0),
            padding: UiRect::all(Val::Px(5.0)),
            ..default()
        },
        BackgroundColor(Color::srgba(0.0, 0.0, 0.0, 0.5)),
        AttributionText,
    ));
}

fn handle_camera_controls(
    mouse_button: Res<ButtonInput<MouseButton>>,
    mut mouse_motion: MessageReader<MouseMotion>,
    mut scroll_events: MessageReader<MouseWheel>,
    mut orbit: ResMut<OrbitCamera>,
    mut cameras: Query<&mut Transform, With<Camera3d>>,
) {
    if mouse_button.pressed(MouseButton::Left) {
        for event in mouse_motion.read() {
            orbit.yaw = (orbit.yaw - event.delta.x * ORBIT_SENSITIVITY).rem_euclid(360.0);
            orbit.pitch = (orbit.pitch + event.delta.y * ORBIT_SENSITIVITY).clamp(5.0, 89.0);
        }
    } else {
        mouse_motion.clear();
    }

    for event in scroll_events.read() {
        let factor = 1.0 - event.y * ZOOM_SENSITIVITY;
        orbit.distance = (orbit.distance * factor).clamp(MIN_DISTANCE, MAX_DISTANCE);
    }

    if orbit.is_changed() {
        for mut transform in cameras.iter_mut() {
            *transform = orbit.transform();
        }
    }
}

/// N: toggle normalized material, M: force material refresh,
/// [ / ]: scrub time of day, L: back to live time, X: dispose, R: restart
fn handle_keyboard(
    keyboard: Res<ButtonInput<KeyCode>>,
    config: Res<AppConfig>,
    session: Res<TileStreamSession>,
    mut clock: ResMut<SceneClock>,
    mut commands: MessageWriter<TileStreamCommand>,
) {
    if keyboard.just_pressed(KeyCode::KeyN) {
        commands.write(TileStreamCommand::SetUseNormalizedMaterial(
            !session.use_normalized_material(),
        ));
    }
    if keyboard.just_pressed(KeyCode::KeyM) {
        commands.write(TileStreamCommand::ForceUpdateMaterials);
    }
    if keyboard.just_pressed(KeyCode::KeyX) {
        commands.write(TileStreamCommand::Dispose);
    }
    if keyboard.just_pressed(KeyCode::KeyR) && !session.is_initialized() {
        commands.write(TileStreamCommand::initialize_from(&config.tiles));
    }

    let step = if keyboard.just_pressed(KeyCode::BracketRight) {
        HOUR_STEP
    } else if keyboard.just_pressed(KeyCode::BracketLeft) {
        -HOUR_STEP
    } else {
        0.0
    };
    if step != 0.0 {
        let hour = (clock.local_hour() + step).rem_euclid(24.0);
        clock.set_hour(hour);
    }
    if keyboard.just_pressed(KeyCode::KeyL) {
        clock.reset_to_live();
    }
}

fn collect_stream_messages(
    mut status: ResMut<StreamStatus>,
    mut failures: MessageReader<TileLoadFailed>,
    mut progress: MessageReader<TileLoadProgress>,
    mut complete: MessageReader<TileLoadComplete>,
    mut attributions: MessageReader<TileAttributionsChanged>,
    mut counts: MessageReader<TileCountChanged>,
) {
    for TileLoadFailed(error) in failures.read() {
        status.last_error = Some(error.to_string());
    }
    for TileLoadProgress(percent) in progress.read() {
        status.progress = *percent;
    }
    if complete.read().count() > 0 {
        status.complete = true;
    }
    for TileAttributionsChanged(text) in attributions.read() {
        status.attributions = text.clone();
    }
    for TileCountChanged(count) in counts.read() {
        status.tiles = *count;
    }
}

fn update_status_text(
    status: Res<StreamStatus>,
    clock: Res<SceneClock>,
    opacity: Res<ShadowOpacitySynchronizer>,
    synthesizer: Res<BuildingShadowSynthesizer>,
    mut status_text: Query<&mut Text, (With<StatusText>, Without<AttributionText>)>,
    mut attribution_text: Query<&mut Text, (With<AttributionText>, Without<StatusText>)>,
) {
    for mut text in status_text.iter_mut() {
        let load = if status.complete {
            "ready".to_string()
        } else {
            format!("{}%", status.progress)
        };
        let mode = if clock.is_manual() { "manual" } else { "live" };
        let mut line = format!(
            "Tiles: {} ({})  Receivers: {}  Shadow: {:.2}\nTime: {} UTC ({})",
            status.tiles,
            load,
            synthesizer.created(),
            opacity.opacity(),
            clock.current_datetime().format("%Y-%m-%d %H:%M"),
            mode,
        );
        if let Some(error) = &status.last_error {
            line.push_str(&format!("\nLast error: {error}"));
        }
        line.push_str("\nN material | M refresh | [ ] hour | L live | X dispose | R restart");
        **text = line;
    }

    if status.is_changed() {
        for mut text in attribution_text.iter_mut() {
            **text = status.attributions.clone();
        }
    }
}
