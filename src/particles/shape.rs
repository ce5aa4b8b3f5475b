use glam::{Vec2, Vec3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;

/// Spawn volume of an emitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmitterShape {
    Sphere(SphereShape),
    Cone(ConeShape),
    Circle(CircleShape),
    Rectangle(RectangleShape),
    Box(BoxShape),
}

impl Default for EmitterShape {
    fn default() -> Self {
        EmitterShape::Sphere(SphereShape::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SphereShape {
    pub radius: f32,
    /// 0 emits from the shell only, 1 from the full volume
    pub radius_thickness: f32,
    /// Azimuthal arc in degrees
    pub arc: f32,
}

impl Default for SphereShape {
    fn default() -> Self {
        Self {
            radius: 1.0,
            radius_thickness: 1.0,
            arc: 360.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConeShape {
    /// Opening angle in degrees at the rim of the base disc
    pub angle: f32,
    pub radius: f32,
    pub radius_thickness: f32,
    pub arc: f32,
}

impl Default for ConeShape {
    fn default() -> Self {
        Self {
            angle: 25.0,
            radius: 1.0,
            radius_thickness: 1.0,
            arc: 360.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircleShape {
    pub radius: f32,
    pub radius_thickness: f32,
    pub arc: f32,
}

impl Default for CircleShape {
    fn default() -> Self {
        Self {
            radius: 1.0,
            radius_thickness: 1.0,
            arc: 360.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RectangleShape {
    /// Tilt around X and Y in degrees
    pub rotation: Vec2,
    /// Width and height
    pub scale: Vec2,
}

impl Default for RectangleShape {
    fn default() -> Self {
        Self {
            rotation: Vec2::ZERO,
            scale: Vec2::ONE,
        }
    }
}

/// Which part of a box spawns particles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxEmitFrom {
    #[default]
    Volume,
    Shell,
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxShape {
    pub scale: Vec3,
    pub emit_from: BoxEmitFrom,
}

impl Default for BoxShape {
    fn default() -> Self {
        Self {
            scale: Vec3::ONE,
            emit_from: BoxEmitFrom::Volume,
        }
    }
}

/// Spawn offset and unit initial direction in the emitter's local frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeSample {
    pub position: Vec3,
    pub direction: Vec3,
}

impl EmitterShape {
    /// Sample a spawn position and direction for one particle
    pub fn spawn<R: Rng + ?Sized>(&self, rng: &mut R) -> ShapeSample {
        let (position, direction) = match self {
            EmitterShape::Sphere(sphere) => sample_sphere(sphere, rng),
            EmitterShape::Cone(cone) => sample_cone(cone, rng),
            EmitterShape::Circle(circle) => sample_circle(circle, rng),
            EmitterShape::Rectangle(rectangle) => sample_rectangle(rectangle, rng),
            EmitterShape::Box(shape) => sample_box(shape, rng),
        };

        ShapeSample { position, direction }
    }
}

/// Distance from the center blending shell (thickness 0) and volume (1)
fn thick_radius(radius: f32, radius_thickness: f32, ratio: f32) -> f32 {
    radius * (1.0 - radius_thickness) + radius * radius_thickness * ratio
}

fn sample_sphere<R: Rng + ?Sized>(sphere: &SphereShape, rng: &mut R) -> (Vec3, Vec3) {
    let u = rng.gen::<f32>() * (sphere.arc / 360.0);
    let v = rng.gen::<f32>();
    let ratio = rng.gen::<f32>();

    let theta = TAU * u;
    let phi = (2.0 * v - 1.0).clamp(-1.0, 1.0).acos();
    let sin_phi = phi.sin();
    let direction = Vec3::new(sin_phi * theta.cos(), sin_phi * theta.sin(), phi.cos());

    let distance = thick_radius(sphere.radius, sphere.radius_thickness, ratio);
    (direction * distance, direction)
}

/// Point on the base disc shared by cone and circle, plus its unit radial
/// direction and the normalized distance from the center
fn sample_disc<R: Rng + ?Sized>(
    radius: f32,
    radius_thickness: f32,
    arc: f32,
    rng: &mut R,
) -> (Vec3, Vec3, f32) {
    let theta = TAU * rng.gen::<f32>() * (arc / 360.0);
    let ratio = rng.gen::<f32>();

    let radial = Vec3::new(theta.cos(), theta.sin(), 0.0);
    let distance = thick_radius(radius, radius_thickness, ratio);
    let normalized = if radius > 0.0 { distance / radius } else { 0.0 };

    (radial * distance, radial, normalized)
}

fn sample_cone<R: Rng + ?Sized>(cone: &ConeShape, rng: &mut R) -> (Vec3, Vec3) {
    let (position, radial, normalized) = sample_disc(cone.radius, cone.radius_thickness, cone.arc, rng);

    // Particles further out tilt further away from the forward axis
    let tilt = (normalized * cone.angle.to_radians()).abs();
    let direction = Vec3::new(radial.x * tilt.sin(), radial.y * tilt.sin(), tilt.cos());

    (position, direction)
}

fn sample_circle<R: Rng + ?Sized>(circle: &CircleShape, rng: &mut R) -> (Vec3, Vec3) {
    let (position, radial, _) = sample_disc(circle.radius, circle.radius_thickness, circle.arc, rng);
    (position, radial)
}

fn sample_rectangle<R: Rng + ?Sized>(rectangle: &RectangleShape, rng: &mut R) -> (Vec3, Vec3) {
    let scale = rectangle.scale;
    let x_offset = rng.gen::<f32>() * scale.x - scale.x / 2.0;
    let y_offset = rng.gen::<f32>() * scale.y - scale.y / 2.0;

    let rotation_x = rectangle.rotation.x.to_radians();
    let rotation_y = rectangle.rotation.y.to_radians();

    let position = Vec3::new(
        x_offset * rotation_y.cos(),
        y_offset * rotation_x.cos(),
        x_offset * rotation_y.sin() - y_offset * rotation_x.sin(),
    );

    (position, Vec3::Z)
}

fn sample_box<R: Rng + ?Sized>(shape: &BoxShape, rng: &mut R) -> (Vec3, Vec3) {
    let unit = match shape.emit_from {
        BoxEmitFrom::Volume => Vec3::new(rng.gen(), rng.gen(), rng.gen()),
        BoxEmitFrom::Shell => {
            // One of six faces: the perpendicular axis is pinned to 0 or 1
            let side = rng.gen_range(0..6usize);
            let axis = side % 3;
            let mut unit = [0.0f32; 3];
            unit[axis] = if side > 2 { 1.0 } else { 0.0 };
            unit[(axis + 1) % 3] = rng.gen();
            unit[(axis + 2) % 3] = rng.gen();
            Vec3::from(unit)
        }
        BoxEmitFrom::Edge => {
            // Pick a face, then one of its four edges
            let side = rng.gen_range(0..6usize);
            let axis = side % 3;
            let edge = rng.gen_range(0..4usize);
            let mut unit = [0.0f32; 3];
            unit[axis] = if side > 2 { 1.0 } else { 0.0 };
            if edge < 2 {
                unit[(axis + 1) % 3] = rng.gen();
                unit[(axis + 2) % 3] = edge as f32;
            } else {
                unit[(axis + 1) % 3] = (edge - 2) as f32;
                unit[(axis + 2) % 3] = rng.gen();
            }
            Vec3::from(unit)
        }
    };

    (unit * shape.scale - shape.scale / 2.0, Vec3::Z)
}
