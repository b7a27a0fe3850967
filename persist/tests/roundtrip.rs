//! End-to-end save/load tests against the public API.

use std::sync::Arc;

use redlilium_persist::{
    assign_ids, DeserializeError, Diagnostic, Entity, FileSink, MemorySink, Persist,
    PersistConfig, PersistError, Schema, SequentialRefGenerator, Serializer, Sink, SinkError,
    Template, TemplateId, TemplateRegistry, World,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Persist, Clone, Default, Debug, PartialEq)]
struct Health {
    hp: i32,
    regen: f32,
}

#[derive(Persist, Clone, Default, Debug, PartialEq)]
struct Link {
    next: Option<Entity>,
}

/// Template "squad" with children "leader" (LocalId 0) and "medic" (1).
fn squad_template(registry: &mut TemplateRegistry) -> TemplateId {
    let mut authoring = World::new();
    let root = authoring.spawn("squad");
    let leader = authoring.spawn_child(root, "leader");
    let medic = authoring.spawn_child(root, "medic");
    authoring.insert_state(leader, Health { hp: 100, regen: 0.5 });
    authoring.insert_state(medic, Health { hp: 60, regen: 2.0 });
    assign_ids(&mut authoring, root, |_| false).unwrap();
    registry.register(&Arc::new(Template::extract(&authoring, root)))
}

/// Template "ring" whose two children link to each other through state.
fn ring_template(registry: &mut TemplateRegistry) -> TemplateId {
    let mut authoring = World::new();
    let root = authoring.spawn("ring");
    let a = authoring.spawn_child(root, "a");
    let b = authoring.spawn_child(root, "b");
    authoring.insert_state(a, Link::default());
    authoring.insert_state(b, Link::default());
    assign_ids(&mut authoring, root, |_| false).unwrap();
    registry.register(&Arc::new(Template::extract(&authoring, root)))
}

fn empty_template(registry: &mut TemplateRegistry, name: &str) -> TemplateId {
    let mut authoring = World::new();
    let root = authoring.spawn(name);
    assign_ids(&mut authoring, root, |_| false).unwrap();
    registry.register(&Arc::new(Template::extract(&authoring, root)))
}

#[derive(Persist, Default, Debug)]
struct Mission {
    name: String,
    leader: Option<Entity>,
    backup: Option<Entity>,
    targets: Vec<Entity>,
}

impl Schema for Mission {
    const VERSIONS: &'static [u32] = &[1];
}

#[derive(Persist, Default)]
struct Roster {
    #[persist(owned)]
    leader: Option<Entity>,
}

impl Schema for Roster {
    const VERSIONS: &'static [u32] = &[1];
}

#[derive(Persist, Default)]
struct Ring {
    #[persist(owned)]
    nodes: Vec<Entity>,
}

impl Schema for Ring {
    const VERSIONS: &'static [u32] = &[1];
}

#[derive(Persist, Clone, Default, Debug)]
struct Squad {
    label: String,
    leader: Option<Entity>,
}

#[derive(Persist, Default, Debug)]
struct Campaign {
    squads: Vec<Squad>,
    title: String,
}

impl Schema for Campaign {
    const VERSIONS: &'static [u32] = &[1];
}

#[derive(Persist, Default, Debug, PartialEq)]
struct Profile {
    #[persist(renamed_from = "nick")]
    display_name: String,
    #[persist(removed_in = 2)]
    legacy_score: i32,
    level: u32,
}

impl Schema for Profile {
    const VERSIONS: &'static [u32] = &[1, 2];
}

#[derive(Persist, Default, Debug, PartialEq)]
struct Audio {
    volume: f32,
    #[persist(skip)]
    cached: u32,
}

#[derive(Persist, Default, Debug, PartialEq)]
struct Options {
    #[persist(rename = "lang")]
    language: String,
    #[persist(flatten)]
    audio: Audio,
}

impl Schema for Options {
    const VERSIONS: &'static [u32] = &[1];
}

#[derive(Persist, Default, Debug)]
struct Slots {
    refs: Vec<Option<Entity>>,
    nums: Vec<Option<u32>>,
    #[persist(owned)]
    crew: Vec<Option<Entity>>,
}

impl Schema for Slots {
    const VERSIONS: &'static [u32] = &[1];
}

#[derive(Persist, Default, Debug)]
struct Cargo {
    lid: Option<Entity>,
    cart: Option<Entity>,
}

impl Schema for Cargo {
    const VERSIONS: &'static [u32] = &[1];
}

/// Template "cart" with a "wheel" (LocalId 0) and a nested squad instance (1).
fn cart_template(registry: &mut TemplateRegistry, squad: TemplateId) -> TemplateId {
    let mut authoring = World::new();
    let root = authoring.spawn("cart");
    authoring.spawn_child(root, "wheel");
    let nested = authoring.instantiate(registry, squad).unwrap();
    authoring.set_parent(nested, Some(root));
    assign_ids(&mut authoring, root, |_| false).unwrap();
    registry.register(&Arc::new(Template::extract(&authoring, root)))
}

#[test]
fn round_trip_preserves_shared_references() {
    init_logging();
    let mut registry = TemplateRegistry::new();
    let squad = squad_template(&mut registry);

    let mut source = World::with_ref_generator(SequentialRefGenerator::new("a"));
    let root = source.instantiate(&registry, squad).unwrap();
    let leader = source.resolve_local(root, 0).unwrap();
    let medic = source.resolve_local(root, 1).unwrap();
    let mission = Mission {
        name: "escort".into(),
        leader: Some(leader),
        backup: Some(leader),
        targets: vec![medic, leader],
    };

    let sink = MemorySink::new();
    Serializer::new(&mut source, &registry)
        .save(&mission, &sink, "mission.ron")
        .unwrap();

    let mut target = World::with_ref_generator(SequentialRefGenerator::new("b"));
    let mut loaded = Mission::default();
    let report = Serializer::new(&mut target, &registry)
        .load(&mut loaded, &sink, "mission.ron")
        .unwrap();

    assert!(report.is_clean(), "{:?}", report.diagnostics);
    assert_eq!(report.templates_spawned, 1);
    assert_eq!(target.len(), 3);
    assert_eq!(loaded.name, "escort");

    let loaded_leader = loaded.leader.unwrap();
    assert_eq!(loaded.backup, Some(loaded_leader));
    assert_eq!(loaded.targets.len(), 2);
    assert_eq!(loaded.targets[1], loaded_leader);
    assert_ne!(loaded.targets[0], loaded_leader);
    assert_eq!(target.name(loaded_leader), Some("leader"));
    assert_eq!(target.name(loaded.targets[0]), Some("medic"));
    assert_eq!(
        target.identity(loaded_leader).unwrap().runtime_ref(),
        source.identity(leader).unwrap().runtime_ref()
    );
}

#[test]
fn resaving_a_loaded_document_is_identical() {
    init_logging();
    let mut registry = TemplateRegistry::new();
    let squad = squad_template(&mut registry);

    let mut source = World::with_ref_generator(SequentialRefGenerator::new("a"));
    let root = source.instantiate(&registry, squad).unwrap();
    let mission = Mission {
        name: "patrol".into(),
        leader: source.resolve_local(root, 0),
        backup: Some(root),
        targets: vec![source.resolve_local(root, 1).unwrap()],
    };
    let sink = MemorySink::new();
    Serializer::new(&mut source, &registry)
        .save(&mission, &sink, "first.ron")
        .unwrap();

    let mut target = World::with_ref_generator(SequentialRefGenerator::new("b"));
    let mut loaded = Mission::default();
    let mut serializer = Serializer::new(&mut target, &registry);
    serializer.load(&mut loaded, &sink, "first.ron").unwrap();
    serializer.save(&loaded, &sink, "second.ron").unwrap();

    assert_eq!(sink.get("first.ron"), sink.get("second.ron"));
}

#[test]
fn shared_instance_is_spawned_once() {
    init_logging();
    let mut registry = TemplateRegistry::new();
    for name in ["a", "b", "c"] {
        empty_template(&mut registry, name);
    }
    let mut authoring = World::new();
    let root = authoring.spawn("pair");
    authoring.spawn_child(root, "left");
    authoring.spawn_child(root, "right");
    assign_ids(&mut authoring, root, |_| false).unwrap();
    let pair = registry.register(&Arc::new(Template::extract(&authoring, root)));
    assert_eq!(pair, TemplateId(3));

    let sink = MemorySink::new();
    sink.insert(
        "hand.ron",
        r#"{"version": 1, "leader": "3.rootA.1.B", "backup": "3.rootA.0.A"}"#,
    );

    let mut world = World::new();
    let mut mission = Mission::default();
    let report = Serializer::new(&mut world, &registry)
        .load(&mut mission, &sink, "hand.ron")
        .unwrap();

    assert_eq!(report.templates_spawned, 1);
    assert_eq!(world.len(), 3);
    let right = mission.leader.unwrap();
    let left = mission.backup.unwrap();
    assert_eq!(world.name(right), Some("right"));
    assert_eq!(world.name(left), Some("left"));
    assert_eq!(world.parent(right), world.parent(left));
    let instance = world.parent(right).unwrap();
    assert_eq!(world.identity(instance).unwrap().runtime_ref(), Some("rootA"));
    assert_eq!(world.identity(right).unwrap().runtime_ref(), Some("B"));
}

#[test]
fn unsupported_version_leaves_root_untouched() {
    init_logging();
    let registry = TemplateRegistry::new();
    let sink = MemorySink::new();
    sink.insert("future.ron", r#"{"version": 999, "name": "changed"}"#);

    let mut world = World::new();
    let mut mission = Mission {
        name: "kept".into(),
        ..Mission::default()
    };
    let err = Serializer::new(&mut world, &registry)
        .load(&mut mission, &sink, "future.ron")
        .unwrap_err();

    assert!(matches!(
        err,
        PersistError::Deserialize(DeserializeError::UnsupportedVersion { found: 999, .. })
    ));
    assert_eq!(mission.name, "kept");
    assert!(world.is_empty());
}

#[test]
fn absent_values_are_omitted_and_missing_keys_keep_fields() {
    init_logging();
    let registry = TemplateRegistry::new();
    let mut world = World::new();
    let sink = MemorySink::new();

    let mut serializer = Serializer::new(&mut world, &registry);
    serializer
        .save(
            &Mission {
                name: "solo".into(),
                ..Mission::default()
            },
            &sink,
            "solo.ron",
        )
        .unwrap();
    let text = sink.get("solo.ron").unwrap();
    assert!(!text.contains("leader"));
    assert!(!text.contains("backup"));

    sink.insert("partial.ron", r#"{"version": 1}"#);
    let mut mission = Mission {
        name: "keep".into(),
        ..Mission::default()
    };
    let report = serializer.load(&mut mission, &sink, "partial.ron").unwrap();
    assert!(report.is_clean());
    assert_eq!(mission.name, "keep");
}

#[test]
fn schema_evolution_renames_and_removals() {
    init_logging();
    let registry = TemplateRegistry::new();
    let mut world = World::new();
    let sink = MemorySink::new();
    let mut serializer = Serializer::new(&mut world, &registry);

    sink.insert(
        "v1.ron",
        r#"{"version": 1, "nick": "ann", "legacy_score": 5, "level": 3}"#,
    );
    let mut profile = Profile::default();
    serializer.load(&mut profile, &sink, "v1.ron").unwrap();
    assert_eq!(
        profile,
        Profile {
            display_name: "ann".into(),
            legacy_score: 5,
            level: 3,
        }
    );

    serializer.save(&profile, &sink, "v2.ron").unwrap();
    let text = sink.get("v2.ron").unwrap();
    assert!(text.contains("display_name"));
    assert!(!text.contains("legacy_score"));

    sink.insert("v2-stale.ron", r#"{"version": 2, "legacy_score": 7}"#);
    let mut fresh = Profile::default();
    serializer.load(&mut fresh, &sink, "v2-stale.ron").unwrap();
    assert_eq!(fresh.legacy_score, 0);
}

#[test]
fn rename_skip_and_flatten_attributes() {
    init_logging();
    let registry = TemplateRegistry::new();
    let mut world = World::new();
    let sink = MemorySink::new();
    let mut serializer = Serializer::new(&mut world, &registry);

    let options = Options {
        language: "en".into(),
        audio: Audio {
            volume: 0.5,
            cached: 9,
        },
    };
    serializer.save(&options, &sink, "options.ron").unwrap();
    let text = sink.get("options.ron").unwrap();
    assert!(text.contains("\"lang\""));
    assert!(text.contains("\"volume\""));
    assert!(!text.contains("audio"));
    assert!(!text.contains("cached"));

    let mut loaded = Options::default();
    serializer.load(&mut loaded, &sink, "options.ron").unwrap();
    assert_eq!(loaded.language, "en");
    assert_eq!(loaded.audio.volume, 0.5);
    assert_eq!(loaded.audio.cached, 0);
}

#[test]
fn registry_miss_in_subtree_is_recovered() {
    init_logging();
    let mut registry = TemplateRegistry::new();
    let squad = squad_template(&mut registry);
    let sink = MemorySink::new();
    sink.insert(
        "campaign.ron",
        format!(
            r#"{{"version": 1, "squads": [{{"label": "lost", "leader": "77.x.0.y"}}, {{"label": "found", "leader": "{squad}.s.0.l"}}], "title": "march"}}"#
        ),
    );

    let mut world = World::new();
    let mut campaign = Campaign::default();
    let report = Serializer::new(&mut world, &registry)
        .load(&mut campaign, &sink, "campaign.ron")
        .unwrap();

    assert_eq!(campaign.title, "march");
    assert_eq!(campaign.squads.len(), 2);
    assert_eq!(campaign.squads[0].label, "lost");
    assert!(campaign.squads[0].leader.is_none());
    let found = campaign.squads[1].leader.unwrap();
    assert_eq!(world.name(found), Some("leader"));
    assert!(report
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::SubtreeAborted { .. })));
}

#[test]
fn registry_miss_at_root_is_fatal() {
    init_logging();
    let registry = TemplateRegistry::new();
    let sink = MemorySink::new();
    sink.insert("bad.ron", r#"{"version": 1, "leader": "77.x.0.y"}"#);

    let mut world = World::new();
    let mut mission = Mission::default();
    let err = Serializer::new(&mut world, &registry)
        .load(&mut mission, &sink, "bad.ron")
        .unwrap_err();
    assert!(matches!(
        err,
        PersistError::Deserialize(DeserializeError::UnknownTemplate { id }) if id == TemplateId(77)
    ));
}

#[test]
fn malformed_reference_is_a_type_mismatch() {
    init_logging();
    let registry = TemplateRegistry::new();
    let sink = MemorySink::new();
    sink.insert("bad.ron", r#"{"version": 1, "name": "m", "leader": "not-an-id"}"#);

    let mut world = World::new();
    let mut mission = Mission::default();
    let report = Serializer::new(&mut world, &registry)
        .load(&mut mission, &sink, "bad.ron")
        .unwrap();
    assert_eq!(mission.name, "m");
    assert!(mission.leader.is_none());
    assert!(report
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::TypeMismatch { key, .. } if key == "leader")));
}

#[test]
fn cyclic_references_between_owned_entities() {
    init_logging();
    let mut registry = TemplateRegistry::new();
    let ring = ring_template(&mut registry);

    let mut source = World::with_ref_generator(SequentialRefGenerator::new("a"));
    let root = source.instantiate(&registry, ring).unwrap();
    let a = source.resolve_local(root, 0).unwrap();
    let b = source.resolve_local(root, 1).unwrap();
    source.state_mut::<Link>(a).unwrap().next = Some(b);
    source.state_mut::<Link>(b).unwrap().next = Some(a);

    let sink = MemorySink::new();
    Serializer::new(&mut source, &registry)
        .save(&Ring { nodes: vec![a, b] }, &sink, "ring.ron")
        .unwrap();

    let mut target = World::new();
    let mut loaded = Ring::default();
    let report = Serializer::new(&mut target, &registry)
        .load(&mut loaded, &sink, "ring.ron")
        .unwrap();

    assert!(report.is_clean(), "{:?}", report.diagnostics);
    assert_eq!(report.templates_spawned, 1);
    let [a, b] = loaded.nodes[..] else {
        panic!("expected two nodes, got {:?}", loaded.nodes);
    };
    assert_eq!(target.state::<Link>(a).unwrap().next, Some(b));
    assert_eq!(target.state::<Link>(b).unwrap().next, Some(a));
}

#[test]
fn owned_entity_state_is_hydrated() {
    init_logging();
    let mut registry = TemplateRegistry::new();
    let squad = squad_template(&mut registry);

    let mut source = World::new();
    let root = source.instantiate(&registry, squad).unwrap();
    let leader = source.resolve_local(root, 0).unwrap();
    *source.state_mut::<Health>(leader).unwrap() = Health { hp: 42, regen: 1.5 };

    let sink = MemorySink::new();
    Serializer::new(&mut source, &registry)
        .save(&Roster { leader: Some(leader) }, &sink, "roster.ron")
        .unwrap();
    assert!(sink.get("roster.ron").unwrap().contains("\"@id\""));

    let mut target = World::new();
    let mut roster = Roster::default();
    Serializer::new(&mut target, &registry)
        .load(&mut roster, &sink, "roster.ron")
        .unwrap();

    let loaded = roster.leader.unwrap();
    assert_eq!(target.state::<Health>(loaded), Some(&Health { hp: 42, regen: 1.5 }));
    let medic = target.resolve_local(target.parent(loaded).unwrap(), 1).unwrap();
    assert_eq!(target.state::<Health>(medic).unwrap().hp, 60);
}

#[test]
fn duplicate_runtime_reference_is_reported() {
    init_logging();
    let mut registry = TemplateRegistry::new();
    let squad = squad_template(&mut registry);
    let sink = MemorySink::new();
    sink.insert(
        "dup.ron",
        format!(r#"{{"version": 1, "leader": "{squad}.r.0.r"}}"#),
    );

    let mut world = World::new();
    let mut mission = Mission::default();
    let report = Serializer::new(&mut world, &registry)
        .load(&mut mission, &sink, "dup.ron")
        .unwrap();

    assert!(report.diagnostics.contains(&Diagnostic::DuplicateReference {
        runtime_ref: "r".into()
    }));
    assert_eq!(world.name(mission.leader.unwrap()), Some("squad"));
}

#[test]
fn reconnect_reuses_live_entities() {
    init_logging();
    let mut registry = TemplateRegistry::new();
    let squad = squad_template(&mut registry);

    let mut world = World::with_ref_generator(SequentialRefGenerator::new("w"));
    let root = world.instantiate(&registry, squad).unwrap();
    let leader = world.resolve_local(root, 0).unwrap();
    let sink = MemorySink::new();
    Serializer::new(&mut world, &registry)
        .save(
            &Mission {
                leader: Some(leader),
                ..Mission::default()
            },
            &sink,
            "live.ron",
        )
        .unwrap();

    let config = PersistConfig {
        reconnect_live_entities: true,
        ..PersistConfig::default()
    };
    let mut mission = Mission::default();
    let report = Serializer::with_config(&mut world, &registry, config)
        .load(&mut mission, &sink, "live.ron")
        .unwrap();
    assert_eq!(report.templates_spawned, 0);
    assert_eq!(mission.leader, Some(leader));
    assert_eq!(world.len(), 3);

    let mut detached = Mission::default();
    let report = Serializer::new(&mut world, &registry)
        .load(&mut detached, &sink, "live.ron")
        .unwrap();
    assert_eq!(report.templates_spawned, 1);
    assert_ne!(detached.leader, Some(leader));
    assert_eq!(world.len(), 6);
}

#[test]
fn file_sink_round_trip_and_missing_file() {
    init_logging();
    let dir = std::env::temp_dir().join("redlilium_persist_roundtrip_files");
    let _ = std::fs::remove_dir_all(&dir);
    let sink = FileSink::new(&dir);
    let registry = TemplateRegistry::new();
    let mut world = World::new();
    let mut serializer = Serializer::new(&mut world, &registry);

    let profile = Profile {
        display_name: "bo".into(),
        legacy_score: 0,
        level: 12,
    };
    serializer.save(&profile, &sink, "profiles/bo.ron").unwrap();
    assert!(sink.read_text("profiles/bo.ron").unwrap().contains("version"));

    let mut loaded = Profile::default();
    serializer.load(&mut loaded, &sink, "profiles/bo.ron").unwrap();
    assert_eq!(loaded, profile);

    let err = serializer
        .load(&mut loaded, &sink, "profiles/missing.ron")
        .unwrap_err();
    assert!(matches!(
        err,
        PersistError::Io {
            source: SinkError::NotFound(_),
            ..
        }
    ));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn read_only_sink_rejects_save() {
    init_logging();
    let registry = TemplateRegistry::new();
    let mut world = World::new();
    let sink = FileSink::read_only(std::env::temp_dir());
    let err = Serializer::new(&mut world, &registry)
        .save(&Profile::default(), &sink, "never.ron")
        .unwrap_err();
    assert!(matches!(
        err,
        PersistError::Io {
            source: SinkError::ReadOnly,
            ..
        }
    ));
}

#[test]
fn lists_of_options_keep_their_slots() {
    init_logging();
    let mut registry = TemplateRegistry::new();
    let squad = squad_template(&mut registry);

    let mut source = World::with_ref_generator(SequentialRefGenerator::new("a"));
    let first = source.instantiate(&registry, squad).unwrap();
    let second = source.instantiate(&registry, squad).unwrap();
    let leader = source.resolve_local(first, 0).unwrap();
    let medic = source.resolve_local(first, 1).unwrap();
    let crew_medic = source.resolve_local(second, 1).unwrap();
    source.state_mut::<Health>(crew_medic).unwrap().hp = 7;
    let slots = Slots {
        refs: vec![Some(leader), None, Some(medic)],
        nums: vec![Some(1), None, Some(3)],
        crew: vec![None, Some(crew_medic)],
    };
    let sink = MemorySink::new();
    Serializer::new(&mut source, &registry)
        .save(&slots, &sink, "slots.ron")
        .unwrap();

    let mut target = World::new();
    let mut loaded = Slots::default();
    let report = Serializer::new(&mut target, &registry)
        .load(&mut loaded, &sink, "slots.ron")
        .unwrap();

    assert!(report.is_clean(), "{:?}", report.diagnostics);
    assert_eq!(report.templates_spawned, 2);
    assert_eq!(loaded.nums, [Some(1), None, Some(3)]);
    let names: Vec<_> = loaded.refs.iter().map(|r| r.and_then(|e| target.name(e))).collect();
    assert_eq!(names, [Some("leader"), None, Some("medic")]);
    let [None, Some(crew)] = loaded.crew[..] else {
        panic!("expected an empty slot then a crew member, got {:?}", loaded.crew);
    };
    assert_eq!(target.state::<Health>(crew).unwrap().hp, 7);
}

#[test]
fn reference_into_nested_template_spawns_outer_instance_once() {
    init_logging();
    let mut registry = TemplateRegistry::new();
    let squad = squad_template(&mut registry);
    let cart = cart_template(&mut registry, squad);

    let mut source = World::with_ref_generator(SequentialRefGenerator::new("a"));
    let cart_root = source.instantiate(&registry, cart).unwrap();
    assert_eq!(source.len(), 5);
    let nested = source.resolve_local(cart_root, 1).unwrap();
    let medic = source.resolve_local(nested, 1).unwrap();
    let sink = MemorySink::new();
    Serializer::new(&mut source, &registry)
        .save(
            &Cargo {
                lid: Some(medic),
                cart: Some(cart_root),
            },
            &sink,
            "cargo.ron",
        )
        .unwrap();

    let mut target = World::new();
    let mut loaded = Cargo::default();
    let report = Serializer::new(&mut target, &registry)
        .load(&mut loaded, &sink, "cargo.ron")
        .unwrap();

    assert!(report.is_clean(), "{:?}", report.diagnostics);
    assert_eq!(report.templates_spawned, 1);
    assert_eq!(target.len(), 5);
    let lid = loaded.lid.unwrap();
    let loaded_cart = loaded.cart.unwrap();
    assert_eq!(target.name(lid), Some("medic"));
    assert_eq!(target.state::<Health>(lid).unwrap().hp, 60);
    let squad_root = target.parent(lid).unwrap();
    assert_eq!(target.name(squad_root), Some("squad"));
    assert_eq!(target.parent(squad_root), Some(loaded_cart));
}

#[test]
fn nested_reference_alone_restores_outer_instance() {
    init_logging();
    let mut registry = TemplateRegistry::new();
    let squad = squad_template(&mut registry);
    let cart = cart_template(&mut registry, squad);

    let mut source = World::with_ref_generator(SequentialRefGenerator::new("a"));
    let cart_root = source.instantiate(&registry, cart).unwrap();
    let nested = source.resolve_local(cart_root, 1).unwrap();
    let leader = source.resolve_local(nested, 0).unwrap();
    let sink = MemorySink::new();
    let mut serializer = Serializer::new(&mut source, &registry);
    serializer
        .save(&Cargo { lid: Some(leader), cart: None }, &sink, "lid.ron")
        .unwrap();
    let cart_ref = source.identity(cart_root).unwrap().runtime_ref().map(str::to_owned);

    let mut target = World::new();
    let mut loaded = Cargo::default();
    let report = Serializer::new(&mut target, &registry)
        .load(&mut loaded, &sink, "lid.ron")
        .unwrap();

    assert_eq!(report.templates_spawned, 1);
    assert_eq!(target.len(), 5);
    let lid = loaded.lid.unwrap();
    assert_eq!(target.name(lid), Some("leader"));
    let outer = target.parent(target.parent(lid).unwrap()).unwrap();
    assert_eq!(target.name(outer), Some("cart"));
    assert_eq!(target.identity(outer).unwrap().runtime_ref().map(str::to_owned), cart_ref);
}
