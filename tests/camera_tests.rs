//! Camera Tests
//!
//! Tests for:
//! - Lazy matrix updates and the generation counter
//! - Stale frustum planes until the next update
//! - Projection to and from pixel coordinates, picking rays
//! - Free-camera manipulation (orbit, look_at, right vector)
//! - Node-bound cameras

use glam::{Mat4, Vec3, Vec4};

use one_render::backend::Viewport;
use one_render::errors::RenderError;
use one_render::scene::{Camera, Node, ProjectionType, Scene, Transform};

const EPSILON: f32 = 1e-4;

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

fn approx_vec3(a: Vec3, b: Vec3, eps: f32) -> bool {
    (a - b).abs().max_element() < eps
}

fn approx_mat4(a: &Mat4, b: &Mat4) -> bool {
    a.to_cols_array()
        .iter()
        .zip(b.to_cols_array().iter())
        .all(|(x, y)| (x - y).abs() < EPSILON * x.abs().max(1.0))
}

fn looking_at_origin() -> Camera {
    let mut camera = Camera::new_perspective(45.0, 1.0, 0.1, 1000.0);
    camera.look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
    camera
}

// ============================================================================
// Matrix Invariants
// ============================================================================

#[test]
fn view_projection_is_projection_times_view() {
    let mut camera = looking_at_origin();
    camera.set_fov(60.0);
    camera.move_by(Vec3::new(1.0, 2.0, 0.0));
    camera.set_near(0.5);
    camera.update_matrices(false);

    let expected = camera.cached_projection_matrix() * camera.cached_view_matrix();
    assert!(
        approx_mat4(&camera.cached_view_projection_matrix(), &expected),
        "view_projection must equal projection * view after an update"
    );
    assert!(!camera.is_dirty(), "Camera should be clean after update_matrices");
}

#[test]
fn unrelated_fields_do_not_dirty_matrices() {
    let mut camera = looking_at_origin();
    camera.update_matrices(false);
    let generation = camera.generation();

    camera.layers = 0b0100;
    camera.background_color = Vec4::new(1.0, 0.0, 0.0, 1.0);
    camera.clear_color = false;

    assert_eq!(camera.generation(), generation, "Plain fields must not bump the generation");
    assert!(!camera.is_dirty());
}

#[test]
fn every_setter_bumps_generation() {
    let mut camera = Camera::new();
    let start = camera.generation();

    camera.set_fov(50.0);
    camera.set_far(200.0);
    camera.set_eye(Vec3::new(0.0, 1.0, 0.0));
    camera.set_projection_type(ProjectionType::Orthographic);

    assert_eq!(camera.generation(), start + 4);
    assert!(camera.is_dirty());

    camera.update_matrices(false);
    assert!(!camera.is_dirty());
}

#[test]
fn lazy_accessors_update_stale_matrices() {
    let mut camera = looking_at_origin();
    let first = camera.view_matrix();
    camera.set_eye(Vec3::new(0.0, 0.0, 10.0));
    assert!(camera.is_dirty());

    let second = camera.view_matrix();
    assert!(!camera.is_dirty(), "Lazy accessor should refresh the matrices");
    assert!(!approx_mat4(&first, &second), "View matrix should follow the new eye");
}

#[test]
fn custom_projection_replaces_computed_one() {
    let mut camera = looking_at_origin();
    let custom = Mat4::orthographic_rh_gl(-1.0, 1.0, -1.0, 1.0, 0.1, 10.0);
    camera.set_custom_projection_matrix(Some(custom));
    camera.set_fov(90.0);
    camera.update_matrices(false);
    assert!(approx_mat4(&camera.cached_projection_matrix(), &custom));

    camera.set_custom_projection_matrix(None);
    camera.update_matrices(false);
    assert!(!approx_mat4(&camera.cached_projection_matrix(), &custom));
}

// ============================================================================
// Frustum
// ============================================================================

#[test]
fn frustum_uses_planes_from_last_update() {
    let mut camera = looking_at_origin();
    camera.update_matrices(false);

    let point = Vec3::new(3.0, 0.0, 0.0);
    assert!(camera.test_sphere_inside_frustum(Vec3::ZERO, 0.0));
    assert!(
        !camera.test_sphere_inside_frustum(point, 0.0),
        "Point is outside a 45 degree frustum"
    );

    camera.set_fov(120.0);
    assert!(
        !camera.test_sphere_inside_frustum(point, 0.0),
        "Planes must stay stale until update_matrices"
    );

    camera.update_matrices(false);
    assert!(
        camera.test_sphere_inside_frustum(point, 0.0),
        "Wider fov should contain the point after the update"
    );
}

#[test]
fn points_behind_the_camera_are_outside() {
    let mut camera = looking_at_origin();
    camera.update_matrices(false);
    assert!(!camera.test_sphere_inside_frustum(Vec3::new(0.0, 0.0, 10.0), 0.0));
    assert!(!camera.test_sphere_inside_frustum(Vec3::new(0.0, 0.0, -2000.0), 0.0));
}

// ============================================================================
// Projection Helpers
// ============================================================================

#[test]
fn project_center_lands_in_viewport_middle() {
    let mut camera = looking_at_origin();
    let viewport = Viewport::from_size(800, 600);
    let screen = camera.project(Vec3::ZERO, Some(viewport));

    assert!(approx(screen.x, 400.0), "x = {}", screen.x);
    assert!(approx(screen.y, 300.0), "y = {}", screen.y);
    assert!(screen.z > 0.0 && screen.z < 1.0);
}

#[test]
fn project_uses_top_left_origin() {
    let mut camera = looking_at_origin();
    let viewport = Viewport::from_size(800, 600);
    let above = camera.project(Vec3::new(0.0, 1.0, 0.0), Some(viewport));
    assert!(above.y < 300.0, "A point above the center should have a smaller y, got {}", above.y);
}

#[test]
fn unproject_inverts_project() {
    let mut camera = Camera::new_perspective(45.0, 1.0, 1.0, 100.0);
    camera.look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
    let viewport = Viewport::from_size(600, 600);

    let point = Vec3::new(0.5, -0.25, 1.0);
    let screen = camera.project(point, Some(viewport));
    let bottom_left = Vec3::new(screen.x, 600.0 - screen.y, screen.z);
    let back = camera
        .unproject(bottom_left, Some(viewport))
        .expect("point should unproject");

    assert!(approx_vec3(back, point, 1e-2), "Expected {point}, got {back}");
}

#[test]
fn unproject_fails_on_empty_viewport() {
    let mut camera = looking_at_origin();
    assert!(camera.unproject(Vec3::ZERO, Some(Viewport::new(0, 0, 0, 0))).is_none());
}

#[test]
fn center_ray_points_forward() {
    let mut camera = looking_at_origin();
    let ray = camera
        .get_ray(400.0, 300.0, Some(Viewport::from_size(800, 600)))
        .expect("ray through viewport center");

    assert!(approx_vec3(ray.origin, Vec3::new(0.0, 0.0, 5.0), EPSILON));
    assert!(approx_vec3(ray.direction, Vec3::NEG_Z, 1e-3), "direction {}", ray.direction);
}

#[test]
fn local_viewport_applies_normalized_rect() {
    let mut camera = Camera::new();
    camera.set_viewport(Vec4::new(0.5, 0.0, 0.5, 1.0));
    let local = camera.local_viewport(Some(Viewport::from_size(800, 600)));
    assert_eq!(local, Viewport::new(400, 0, 400, 600));

    assert!(camera.is_point_2d_in_viewport(600.0, 100.0, Some(Viewport::from_size(800, 600))));
    assert!(!camera.is_point_2d_in_viewport(100.0, 100.0, Some(Viewport::from_size(800, 600))));
}

// ============================================================================
// Manipulation
// ============================================================================

#[test]
fn orbit_zero_angle_is_a_no_op() {
    let mut camera = looking_at_origin();
    camera.update_matrices(false);
    let generation = camera.generation();

    assert!(camera.orbit(0.0, None, None).is_ok());
    assert_eq!(camera.generation(), generation);
    assert!(!camera.is_dirty());
}

#[test]
fn orbit_without_axis_is_an_error() {
    let mut camera = looking_at_origin();
    let result = camera.orbit(30.0, None, None);
    assert!(matches!(result, Err(RenderError::MissingRotationAxis)));
}

#[test]
fn orbit_rotates_eye_around_center() {
    let mut camera = looking_at_origin();
    camera
        .orbit(90.0, Some(Vec3::Y), None)
        .expect("orbit with axis");

    assert!(
        approx_vec3(camera.eye(), Vec3::new(5.0, 0.0, 0.0), 1e-3),
        "eye after orbit: {}",
        camera.eye()
    );
    assert!(approx_vec3(camera.center(), Vec3::ZERO, EPSILON));
}

#[test]
fn right_vector_is_front_cross_up() {
    let camera = Camera::new();
    assert!(approx_vec3(camera.get_front(), Vec3::NEG_Z, EPSILON));
    assert!(approx_vec3(camera.get_right(), Vec3::X, EPSILON));
    assert!(approx_vec3(camera.get_top(), Vec3::Y, EPSILON));
}

#[test]
fn set_distance_to_center_moves_eye() {
    let mut camera = looking_at_origin();
    camera.set_distance_to_center(2.0, true);
    assert!(approx_vec3(camera.eye(), Vec3::new(0.0, 0.0, 2.0), EPSILON));
}

// ============================================================================
// Node-Bound Cameras
// ============================================================================

#[test]
fn node_camera_follows_node_transform() {
    let mut scene = Scene::new();
    let node = scene.add_node(
        Node::new("rig").with_transform(Transform::from_position(Vec3::new(0.0, 0.0, 10.0))),
    );
    let key = scene
        .add_camera_to_node(node, Camera::new())
        .expect("node exists");

    scene.collect_data(None);

    let camera = scene.camera(key).expect("camera");
    assert!(
        approx_vec3(camera.get_eye(), Vec3::new(0.0, 0.0, 10.0), EPSILON),
        "eye {}",
        camera.get_eye()
    );
}

#[test]
fn node_camera_ignores_direct_movement() {
    let mut scene = Scene::new();
    let node = scene.add_node(Node::new("rig"));
    let key = scene
        .add_camera_to_node(node, Camera::new())
        .expect("node exists");

    let camera = scene.camera_mut(key).expect("camera");
    let eye = camera.eye();
    camera.look_at(Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO, Vec3::Y);
    camera.move_by(Vec3::X);
    assert_eq!(camera.eye(), eye, "Bound cameras are moved through their node");
}

#[test]
fn scene_look_at_moves_the_owning_node() {
    let mut scene = Scene::new();
    let node = scene.add_node(Node::new("rig"));
    let key = scene
        .add_camera_to_node(node, Camera::new())
        .expect("node exists");

    scene
        .camera_look_at(key, Vec3::new(0.0, 0.0, 8.0), Vec3::ZERO, Vec3::Y)
        .expect("camera exists");
    scene.collect_data(None);

    let camera = scene.camera(key).expect("camera");
    assert!(approx_vec3(camera.get_eye(), Vec3::new(0.0, 0.0, 8.0), 1e-3));
    assert!(approx_vec3(camera.get_front(), Vec3::NEG_Z, 1e-3));
}
