use hawser::{
    CollisionMask, Cuboid, HalfSpace, NoOpRopeObserver, Placement, Pose, Rope, RopeParams, Scene, Vec as _, Vec3,
};

const DT: f64 = 0.02;

fn rope_on_floor(params: RopeParams<f64>) -> (Scene<f64>, hawser::EntityId, Rope<f64>) {
    let mut scene = Scene::new();
    let floor = scene.add_static(Pose::identity(), HalfSpace);
    let rope = Rope::new(params.with_length(2.5)).unwrap();
    let points = (0..=5).map(|i| Vec3::new(i as f64 * 0.5, 0.0, 0.01)).collect();
    rope.configure(5, Placement::Points(points)).unwrap();
    (scene, floor, rope)
}

#[test]
fn resting_contacts_persist() {
    let (scene, floor, rope) = rope_on_floor(RopeParams::new());
    for tick in 0..50 {
        rope.advance(DT, &scene, &mut NoOpRopeObserver);
        for (i, c) in rope.contacts().into_iter().enumerate() {
            let (entity, normal) = c.unwrap_or_else(|| panic!("segment {} lost its contact on tick {}", i, tick));
            assert_eq!(entity, floor);
            assert!(normal.z > 0.9, "floor normal should point up, got {:?}", normal);
        }
    }
    for p in rope.points() {
        assert!(p.z > -0.02, "rope sank through the floor: {:?}", p);
    }
    assert_eq!(rope.status().contacts, 5);
}

#[test]
fn collision_mask_filters_classes() {
    let (scene, _, rope) = rope_on_floor(RopeParams::new().with_collision_mask(CollisionMask::RIGID));
    for _ in 0..5 {
        rope.advance(DT, &scene, &mut NoOpRopeObserver);
    }
    assert!(rope.contacts().iter().all(Option::is_none));
    assert!(rope.points()[5].z < 0.0, "with the floor masked out the rope falls");
}

#[test]
fn removed_collider_drops_contacts() {
    let (mut scene, floor, rope) = rope_on_floor(RopeParams::new());
    for _ in 0..3 {
        rope.advance(DT, &scene, &mut NoOpRopeObserver);
    }
    assert!(rope.contacts().iter().any(Option::is_some));

    assert!(scene.remove(floor));
    rope.wake();
    rope.advance(DT, &scene, &mut NoOpRopeObserver);
    assert!(rope.contacts().iter().all(Option::is_none));
}

#[test]
fn bounds_cover_the_chain() {
    let mut scene = Scene::new();
    scene.add_static(Pose::from_position(Vec3::new(10.0, 0.0, 0.0)), Cuboid::new(Vec3::new(0.5, 0.5, 0.5)));
    let rope = Rope::new(RopeParams::new().with_length(2.0).with_gravity(Vec3::zero())).unwrap();
    let points = (0..=4).map(|i| Vec3::new(i as f64 * 0.5, 0.0, 1.0)).collect();
    rope.configure(4, Placement::Points(points)).unwrap();
    rope.advance(DT, &scene, &mut NoOpRopeObserver);

    let bounds = rope.bounds();
    for p in rope.points() {
        assert!(bounds.contains(p));
    }
    assert!(bounds.max.x < 9.5, "bounds should not reach the far box");
    assert!(rope.contacts().iter().all(Option::is_none));
}
