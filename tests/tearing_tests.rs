use hawser::{
    AnchorSpec, CollisionMask, JointBroken, NoOpRopeObserver, Placement, Pose, Rope, RopeEnd, RopeFlags, RopeObserver,
    RopeParams, Scene, Sphere, Vec as _, Vec3,
};

const DT: f64 = 0.02;

#[derive(Default)]
struct Tears {
    events: Vec<JointBroken<f64>>,
}

impl RopeObserver<f64> for Tears {
    fn on_joint_broken(&mut self, event: &JointBroken<f64>) {
        self.events.push(*event);
    }
}

/// A taut rope from a fixed hook to a body that is dragged away faster
/// every tick.
fn tug_of_war(flags: RopeFlags) -> (Scene<f64>, hawser::EntityId, Rope<f64>) {
    let mut scene = Scene::new();
    let hook = scene.add_static(Pose::identity(), Sphere::new(0.05));
    let end = Vec3::new(4.0, 0.0, 0.0);
    let body = scene.add_body(Pose::from_position(end), 1.0, Sphere::new(0.05));
    scene.set_class(body, CollisionMask::empty());

    let params = RopeParams::new().with_length(4.0).with_max_force(50.0).with_flags(flags);
    let rope = Rope::new(params).unwrap();
    rope.set_anchor(&scene, RopeEnd::Start, Some(AnchorSpec { entity: hook, part: 0, point: Vec3::zero() }));
    rope.set_anchor(&scene, RopeEnd::End, Some(AnchorSpec { entity: body, part: 0, point: end }));
    rope.configure(8, Placement::BetweenAnchors).unwrap();
    (scene, body, rope)
}

#[test]
fn overloaded_rope_tears_once() {
    let (mut scene, body, rope) = tug_of_war(RopeFlags::COLLIDES);
    let mut tears = Tears::default();
    let mut last_impulse = 0.0;
    for k in 1..=20 {
        scene.set_velocity(body, Vec3::new(0.1 * k as f64, 0.0, 0.0), Vec3::zero());
        scene.advance(DT);
        rope.advance(DT, &scene, &mut tears);
        if tears.events.is_empty() {
            let spans = rope.spans();
            assert_eq!(spans.len(), 1, "taut rope should hand one span to the solver on tick {}", k);
            last_impulse = spans[0].impulse;
        }
    }

    assert_eq!(tears.events.len(), 1);
    let event = tears.events[0];
    assert_eq!(event.end, RopeEnd::End);
    assert_eq!(event.entity, body);
    assert!(event.impulse > 50.0 * DT);
    assert!(last_impulse <= 50.0 * DT, "the tick before tearing stayed under the limit");

    assert!(rope.anchor(RopeEnd::End).is_none());
    assert_eq!(rope.status().anchored, [true, false]);
    assert!(!rope.is_strained());
}

#[test]
fn torn_rope_hangs_as_a_chain() {
    let (mut scene, body, rope) = tug_of_war(RopeFlags::COLLIDES);
    for k in 1..=12 {
        scene.set_velocity(body, Vec3::new(0.1 * k as f64, 0.0, 0.0), Vec3::zero());
        scene.advance(DT);
        rope.advance(DT, &scene, &mut NoOpRopeObserver);
    }
    assert!(rope.anchor(RopeEnd::End).is_none());
    for _ in 0..10 {
        rope.advance(DT, &scene, &mut NoOpRopeObserver);
    }
    let points = rope.points();
    assert!(points[0].length() < 1e-9);
    for w in points.windows(2) {
        assert!((w[1].distance(w[0]) - 0.5).abs() < 1e-6);
    }
    assert!(points[8].z < 0.0, "the loose end falls");
}

#[test]
fn no_tears_clamps_tension() {
    let (mut scene, body, rope) = tug_of_war(RopeFlags::COLLIDES | RopeFlags::NO_TEARS);
    let mut tears = Tears::default();
    for k in 1..=20 {
        scene.set_velocity(body, Vec3::new(0.1 * k as f64, 0.0, 0.0), Vec3::zero());
        scene.advance(DT);
        rope.advance(DT, &scene, &mut tears);
        for span in rope.spans() {
            assert!(span.impulse <= 50.0 * DT * 1.1 + 1e-12);
        }
    }
    assert!(tears.events.is_empty());
    assert!(rope.anchor(RopeEnd::End).is_some());
    assert!(rope.is_strained());
}

#[test]
fn blast_tears_the_nearer_anchor() {
    let (scene, body, rope) = tug_of_war(RopeFlags::COLLIDES);
    let hook = rope.anchor(RopeEnd::Start).unwrap().entity;
    rope.advance(DT, &scene, &mut NoOpRopeObserver);

    // Pressure load: sum of 1/|r|^3 over the segment midpoints is about
    // 2.84, times 10 * 4 m * 0.01 m * 2, well past 50 * 0.01.
    let event = rope.apply_explosion(Vec3::new(0.5, 1.0, 0.0), 10.0, 0.5).unwrap().expect("blast should tear");
    assert_eq!(event.end, RopeEnd::Start);
    assert_eq!(event.entity, hook);
    assert!(event.impulse > 0.5);
    assert_eq!(rope.status().anchored, [false, true]);
    assert_eq!(rope.anchor(RopeEnd::End).unwrap().entity, body);
    assert!(!rope.is_strained());
}

#[test]
fn weak_blast_leaves_anchors() {
    let (scene, _, rope) = tug_of_war(RopeFlags::COLLIDES);
    rope.advance(DT, &scene, &mut NoOpRopeObserver);
    assert_eq!(rope.apply_explosion(Vec3::new(0.5, 1.0, 0.0), 0.1, 0.5), Ok(None));
    assert_eq!(rope.status().anchored, [true, true]);

    let (_, _, sturdy) = tug_of_war(RopeFlags::COLLIDES | RopeFlags::NO_TEARS);
    assert_eq!(sturdy.apply_explosion(Vec3::new(0.5, 1.0, 0.0), 10.0, 0.5), Ok(None));
    assert_eq!(sturdy.status().anchored, [true, true]);
}

#[test]
fn blast_pushes_free_points_away() {
    let scene = Scene::new();
    let rope = Rope::new(RopeParams::new().with_length(2.0).with_gravity(Vec3::zero())).unwrap();
    let points = (0..=4).map(|i| Vec3::new(i as f64 * 0.5, 0.0, 0.0)).collect();
    rope.configure(4, Placement::Points(points)).unwrap();

    assert_eq!(rope.apply_explosion(Vec3::new(1.0, 0.0, -1.0), 100.0, 0.5), Ok(None));
    assert!(rope.is_awake());
    for _ in 0..2 {
        rope.advance(DT, &scene, &mut NoOpRopeObserver);
    }
    let points = rope.points();
    assert!(points[2].z > 0.0, "middle moves away from the blast, got {:?}", points[2]);
    assert!(points[2].z > points[0].z);
    assert!(rope.apply_explosion(Vec3::zero(), 1.0, 0.0).is_err());
}
