use glam::Vec3;

/// Where the galaxy viewer starts: above and off to the side of the disc.
pub const HOME_POSITION: Vec3 = Vec3::new(50.0, 75.0, 50.0);

#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(position: Vec3, yaw: f32, pitch: f32) -> Self {
        let mut camera = Self {
            position,
            forward: Vec3::NEG_Z,
            right: Vec3::X,
            up: Vec3::Y,
            yaw,
            pitch,
            fov: 75f32.to_radians(),
            near: 0.1,
            far: 1000.0,
        };
        camera.update_vectors();
        camera
    }

    /// Camera at `position` facing `target`.
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        let mut camera = Self::new(position, 0.0, 0.0);
        look_at_target(&mut camera, target);
        camera
    }

    pub fn update_vectors(&mut self) {
        let forward = Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize();

        let right = forward.cross(Vec3::Y);
        self.right = if right.length_squared() < 1e-6 {
            Vec3::X
        } else {
            right.normalize()
        };
        self.up = self.right.cross(forward).normalize();
        self.forward = forward;
    }

    /// World point in camera space: x right, y up, z along the view direction.
    pub fn world_to_view(&self, point: Vec3) -> Vec3 {
        let rel = point - self.position;
        Vec3::new(rel.dot(self.right), rel.dot(self.up), rel.dot(self.forward))
    }

    pub fn focal_lengths(&self, width: usize, height: usize) -> (f32, f32) {
        let h = height.max(1) as f32;
        let tan_half = (self.fov * 0.5).tan().max(1e-6);
        let fy = h / (2.0 * tan_half);
        // Halfblock pixels are square, so both axes share one focal length.
        (fy, fy)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::looking_at(HOME_POSITION, Vec3::ZERO)
    }
}

pub fn look_at_target(camera: &mut Camera, target: Vec3) {
    let to_target = (target - camera.position).normalize_or_zero();
    if to_target.length_squared() < 1e-8 {
        return;
    }
    camera.yaw = to_target.z.atan2(to_target.x);
    camera.pitch = to_target.y.clamp(-1.0, 1.0).asin().clamp(-1.55, 1.55);
    camera.update_vectors();
}

/// Orbit rig around a fixed target, in the spirit of orbit controls: the
/// camera sits on a sphere and always faces the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orbit {
    pub target: Vec3,
    pub angle: f32,
    pub elevation: f32,
    pub radius: f32,
}

impl Orbit {
    pub const MIN_RADIUS: f32 = 5.0;
    pub const MAX_RADIUS: f32 = 800.0;
    const MAX_ELEVATION: f32 = 1.5;

    /// Orbit that reproduces the camera's current position around `target`.
    pub fn from_position(position: Vec3, target: Vec3) -> Self {
        let offset = position - target;
        let radius = offset.length().max(Self::MIN_RADIUS);
        Self {
            target,
            angle: offset.z.atan2(offset.x),
            elevation: (offset.y / radius).clamp(-1.0, 1.0).asin(),
            radius,
        }
    }

    pub fn position(&self) -> Vec3 {
        let horizontal = self.radius * self.elevation.cos();
        self.target
            + Vec3::new(
                horizontal * self.angle.cos(),
                self.radius * self.elevation.sin(),
                horizontal * self.angle.sin(),
            )
    }

    pub fn rotate(&mut self, delta_angle: f32) {
        self.angle = (self.angle + delta_angle).rem_euclid(std::f32::consts::TAU);
    }

    pub fn tilt(&mut self, delta: f32) {
        self.elevation = (self.elevation + delta).clamp(-Self::MAX_ELEVATION, Self::MAX_ELEVATION);
    }

    pub fn zoom(&mut self, factor: f32) {
        self.radius = (self.radius * factor).clamp(Self::MIN_RADIUS, Self::MAX_RADIUS);
    }

    pub fn apply(&self, camera: &mut Camera) {
        camera.position = self.position();
        look_at_target(camera, self.target);
    }
}

impl Default for Orbit {
    fn default() -> Self {
        Self::from_position(HOME_POSITION, Vec3::ZERO)
    }
}
