use hawser::{
    AnchorSpec, NoOpRopeObserver, Placement, Pose, Rope, RopeEnd, RopeError, RopeParams, RopeSnapshot, Scene, Sphere,
    Vec as _, Vec3, SNAPSHOT_VERSION,
};

const DT: f64 = 0.02;

fn hook(scene: &mut Scene<f64>) -> AnchorSpec<f64> {
    let point = Vec3::new(0.0, 0.0, 3.0);
    let entity = scene.add_static(Pose::from_position(point), Sphere::new(0.05));
    AnchorSpec { entity, part: 0, point }
}

/// A horizontal rope pinned at one end, about to swing down.
fn swinging_rope(scene: &Scene<f64>, hook: AnchorSpec<f64>, segments: usize) -> Rope<f64> {
    let at = hook.point;
    let rope = Rope::new(RopeParams::new().with_length(2.0)).unwrap();
    rope.set_anchor(scene, RopeEnd::Start, Some(hook));
    let points = (0..=segments).map(|i| at + Vec3::new(2.0 * i as f64 / segments as f64, 0.0, 0.0)).collect();
    rope.configure(segments, Placement::Points(points)).unwrap();
    rope
}

#[test]
fn restore_reproduces_the_simulation() {
    let mut scene = Scene::new();
    let pin = hook(&mut scene);
    let rope = swinging_rope(&scene, pin, 8);
    for _ in 0..10 {
        rope.advance(DT, &scene, &mut NoOpRopeObserver);
    }
    let snap = rope.snapshot().unwrap();
    assert_eq!(snap.version, SNAPSHOT_VERSION);
    assert_eq!(snap.points.len(), 9);
    assert!(snap.points[0].velocity.is_none(), "a static anchor point has no velocity");
    assert!(snap.points[8].velocity.is_some(), "the swinging end moves");

    let copy = swinging_rope(&scene, pin, 8);
    copy.restore(&snap).unwrap();
    assert_eq!(copy.points(), rope.points());
    assert_eq!(copy.velocities(), rope.velocities());

    for _ in 0..10 {
        rope.advance(DT, &scene, &mut NoOpRopeObserver);
        copy.advance(DT, &scene, &mut NoOpRopeObserver);
    }
    for (a, b) in rope.points().iter().zip(copy.points().iter()) {
        assert!(a.distance(*b) < 1e-9, "restored rope diverged: {:?} vs {:?}", a, b);
    }
}

#[test]
fn snapshot_survives_json() {
    let mut scene = Scene::new();
    let pin = hook(&mut scene);
    let rope = swinging_rope(&scene, pin, 6);
    for _ in 0..5 {
        rope.advance(DT, &scene, &mut NoOpRopeObserver);
    }
    let snap = rope.snapshot().unwrap();
    let json = serde_json::to_string(&snap).unwrap();
    let back: RopeSnapshot<f64> = serde_json::from_str(&json).unwrap();
    assert_eq!(back.segments, snap.segments);
    assert_eq!(back.awake, snap.awake);
    for (a, b) in back.points.iter().zip(snap.points.iter()) {
        assert!(a.position.distance(b.position) < 1e-12);
        assert_eq!(a.velocity.is_some(), b.velocity.is_some());
    }
}

#[test]
fn mismatched_snapshot_is_rejected_untouched() {
    let mut scene = Scene::new();
    let pin = hook(&mut scene);
    let rope = swinging_rope(&scene, pin, 8);
    rope.advance(DT, &scene, &mut NoOpRopeObserver);
    let snap = rope.snapshot().unwrap();

    let other = swinging_rope(&scene, pin, 6);
    let before = other.points();
    assert_eq!(other.restore(&snap), Err(RopeError::SegmentCountMismatch { expected: 6, found: 8 }));
    assert_eq!(other.points(), before);

    let mut future = snap.clone();
    future.version = SNAPSHOT_VERSION + 1;
    assert_eq!(rope.restore(&future), Err(RopeError::UnsupportedSnapshotVersion { found: SNAPSHOT_VERSION + 1 }));

    let mut short = snap;
    short.points.pop();
    assert_eq!(rope.restore(&short), Err(RopeError::PointCountMismatch { expected: 9, found: 8 }));

    let blank = Rope::new(RopeParams::<f64>::new()).unwrap();
    assert_eq!(blank.restore(&future), Err(RopeError::NotConfigured));
}
