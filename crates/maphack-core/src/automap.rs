//! World-to-automap coordinate projection.
//!
//! The host's automap panel owns the projection math; this module gathers
//! the panel's current geometry (corner or centered placement, shift,
//! scale), asks the panel to build its projection state, and runs one
//! coordinate pair through it.

use tracing::{debug, warn};

use crate::host::ptr::{try_deref, try_read};
use crate::host::{AutoMapData, PanelManager, RectI, Vec2i, Widget};
use crate::offset::slots;
use crate::retcheck::RetcheckFn;

/// Panel placement modes.
const MODE_CORNER: u32 = 1;

/// Scale multipliers inside the automap panel object, past the widget
/// header.
const CENTERED_SCALE_OFFSET: u64 = 0x15A8;
const CORNER_SCALE_OFFSET: u64 = 0x15AC;

/// Projection result for a coordinate that could not be mapped.
const OFF_MAP: (f32, f32) = (-1.0, -1.0);

/// The panel's projection builder takes the rect by pointer and uses SIMD
/// loads on it.
#[repr(C, align(16))]
pub struct AlignedRect(pub RectI);

pub type GetModeFn = unsafe extern "C" fn() -> u32;
pub type PrecisionToAutomapFn = unsafe extern "C" fn(*mut AutoMapData, *mut i64, i64);

/// Resolved panel functions and globals.
pub struct AutomapHost {
    pub panel_manager: *const *mut PanelManager,
    pub get_scaled_position: unsafe extern "C" fn(*mut Widget, *mut Vec2i),
    pub get_scaled_size: unsafe extern "C" fn(*mut Widget, *mut Vec2i),
    pub get_screen_size_x: unsafe extern "C" fn() -> i32,
    pub create_automap_data: unsafe extern "C" fn(*mut AutoMapData, *mut AlignedRect, u64, f32),
    pub get_mode: RetcheckFn<GetModeFn>,
    pub precision_to_automap: RetcheckFn<PrecisionToAutomapFn>,
    pub shift: *const u32,
}

unsafe impl Send for AutomapHost {}

impl AutomapHost {
    pub fn from_slots() -> crate::Result<Self> {
        unsafe {
            Ok(Self {
                panel_manager: slots::PANEL_MANAGER.require()? as *const *mut PanelManager,
                get_scaled_position: std::mem::transmute::<
                    usize,
                    unsafe extern "C" fn(*mut Widget, *mut Vec2i),
                >(slots::WIDGET_GET_SCALED_POSITION.require()? as usize),
                get_scaled_size: std::mem::transmute::<
                    usize,
                    unsafe extern "C" fn(*mut Widget, *mut Vec2i),
                >(slots::WIDGET_GET_SCALED_SIZE.require()? as usize),
                get_screen_size_x: std::mem::transmute::<usize, unsafe extern "C" fn() -> i32>(
                    slots::PANEL_MANAGER_GET_SCREEN_SIZE_X.require()? as usize,
                ),
                create_automap_data: std::mem::transmute::<
                    usize,
                    unsafe extern "C" fn(*mut AutoMapData, *mut AlignedRect, u64, f32),
                >(slots::AUTOMAP_PANEL_CREATE_AUTOMAP_DATA.require()? as usize),
                get_mode: RetcheckFn::from_slot(&slots::AUTOMAP_PANEL_GET_MODE)?,
                precision_to_automap: RetcheckFn::from_slot(
                    &slots::AUTOMAP_PANEL_PRECISION_TO_AUTOMAP,
                )?,
                shift: slots::AUTOMAP_PANEL_SPDW_SHIFT.require()? as *const u32,
            })
        }
    }
}

pub struct Automap {
    host: AutomapHost,
}

impl Automap {
    pub fn new(host: AutomapHost) -> Self {
        Self { host }
    }

    /// The panel's placement mode (1 = corner).
    pub fn mode(&self) -> u32 {
        unsafe { self.host.get_mode.call() }
    }

    /// Project world coordinates onto the automap overlay, in screen
    /// pixels. `(-1, -1)` when the panel is missing, hidden, or the
    /// projection cannot run.
    pub fn world_to_automap(&self, world_x: i32, world_y: i32) -> (f32, f32) {
        let Some(panel_ptr) = try_read(self.host.panel_manager) else {
            warn!("panel manager global is unreadable");
            return OFF_MAP;
        };
        let Some(panel) = (unsafe { try_deref(panel_ptr.cast_const()) }) else {
            warn!("panel manager is not available");
            return OFF_MAP;
        };
        let Some(automap_ptr) = panel.widget.find("AutoMap") else {
            warn!("automap panel widget not found");
            return OFF_MAP;
        };
        let Some(automap) = (unsafe { try_deref(automap_ptr.cast_const()) }) else {
            return OFF_MAP;
        };
        if !automap.is_shown() {
            return OFF_MAP;
        }

        let mode = unsafe { self.host.get_mode.call() };
        let (rect, mut center, scale) = if mode == MODE_CORNER {
            let rect = self.scaled_rect(automap_ptr);
            let Some(multiplier) = scale_at(automap_ptr, CORNER_SCALE_OFFSET) else {
                return OFF_MAP;
            };
            (rect, rect.center(), automap.effective_scale() * multiplier)
        } else {
            let rect = self.scaled_rect(panel_ptr.cast::<Widget>());
            let mut center = rect.center();
            match try_read(self.host.shift) {
                Some(1) => center.x -= unsafe { (self.host.get_screen_size_x)() } / 4,
                Some(2) => center.x += unsafe { (self.host.get_screen_size_x)() } / 4,
                _ => {}
            }
            let Some(multiplier) = scale_at(automap_ptr, CENTERED_SCALE_OFFSET) else {
                return OFF_MAP;
            };
            (rect, center, automap.effective_scale() * multiplier)
        };
        debug!(
            "projecting ({world_x}, {world_y}) rect=({}, {}, {}, {}) center=({}, {}) scale={scale}",
            rect.left, rect.top, rect.right, rect.bottom, center.x, center.y
        );

        let mut data = AutoMapData::default();
        let mut aligned = AlignedRect(rect);
        unsafe {
            (self.host.create_automap_data)(&mut data, &mut aligned, pack_pair(center), scale);
        }

        let mut precision: i64 = pack_pair(Vec2i {
            x: world_x,
            y: world_y,
        }) as i64;
        unsafe {
            self.host
                .precision_to_automap
                .call(&mut data, &mut precision, precision);
        }
        (
            (precision as i32) as f32,
            ((precision >> 32) as i32) as f32,
        )
    }

    fn scaled_rect(&self, widget: *mut Widget) -> RectI {
        let mut position = Vec2i::default();
        let mut size = Vec2i::default();
        unsafe {
            (self.host.get_scaled_position)(widget, &mut position);
            (self.host.get_scaled_size)(widget, &mut size);
        }
        RectI::from_parts(position, size)
    }
}

/// Two i32s packed low/high, the panel's in-register coordinate form.
fn pack_pair(pair: Vec2i) -> u64 {
    (pair.x as u32 as u64) | ((pair.y as u32 as u64) << 32)
}

fn scale_at(widget: *mut Widget, offset: u64) -> Option<f32> {
    try_read((widget as u64 + offset) as *const f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retcheck::testing as retcheck_testing;
    use std::cell::RefCell;
    use std::mem::MaybeUninit;

    // The automap panel object extends well past the widget header; the
    // scale multipliers live in the tail.
    #[repr(C)]
    struct PanelObject {
        widget: Widget,
        _pad: [u8; CENTERED_SCALE_OFFSET as usize - 0x88],
        centered_scale: f32,
        corner_scale: f32,
    }

    const _: () = {
        assert!(std::mem::offset_of!(PanelObject, centered_scale) == CENTERED_SCALE_OFFSET as usize);
        assert!(std::mem::offset_of!(PanelObject, corner_scale) == CORNER_SCALE_OFFSET as usize);
    };

    thread_local! {
        static CREATE_ARGS: RefCell<Option<(RectI, u64, f32)>> = const { RefCell::new(None) };
    }

    unsafe extern "C" fn stub_position(_widget: *mut Widget, out: *mut Vec2i) {
        unsafe { *out = Vec2i { x: 100, y: 200 } };
    }

    unsafe extern "C" fn stub_size(_widget: *mut Widget, out: *mut Vec2i) {
        unsafe { *out = Vec2i { x: 400, y: 300 } };
    }

    unsafe extern "C" fn stub_screen_size_x() -> i32 {
        800
    }

    unsafe extern "C" fn stub_create(
        _data: *mut AutoMapData,
        rect: *mut AlignedRect,
        center: u64,
        scale: f32,
    ) {
        CREATE_ARGS.with_borrow_mut(|args| *args = Some((unsafe { (*rect).0 }, center, scale)));
    }

    const AUTOMAP_NAME: &[u8] = b"AutoMap";

    struct Fixture {
        host_panel: Box<PanelManager>,
        panel_global: Box<*mut PanelManager>,
        automap: Box<PanelObject>,
        children: Box<[*mut Widget; 1]>,
        shift: Box<u32>,
    }

    impl Fixture {
        fn new() -> Self {
            CREATE_ARGS.with_borrow_mut(|args| *args = None);
            let mut fixture = Self {
                host_panel: unsafe { Box::new(MaybeUninit::zeroed().assume_init()) },
                panel_global: Box::new(std::ptr::null_mut()),
                automap: unsafe { Box::new(MaybeUninit::zeroed().assume_init()) },
                children: Box::new([std::ptr::null_mut()]),
                shift: Box::new(0),
            };
            let automap_widget = &mut fixture.automap.widget;
            automap_widget.name.elements = AUTOMAP_NAME.as_ptr().cast_mut();
            automap_widget.name.size = AUTOMAP_NAME.len() as u64;
            automap_widget.enabled = 1;
            automap_widget.visible = 1;
            automap_widget.scale = 1.0;
            fixture.automap.centered_scale = 2.0;
            fixture.automap.corner_scale = 4.0;
            fixture.children[0] = automap_widget as *mut Widget;
            fixture.host_panel.widget.children.elements = fixture.children.as_mut_ptr();
            fixture.host_panel.widget.children.size = 1;
            *fixture.panel_global = &mut *fixture.host_panel;
            fixture
        }

        fn automap(&self) -> Automap {
            Automap::new(AutomapHost {
                panel_manager: &*self.panel_global,
                get_scaled_position: stub_position,
                get_scaled_size: stub_size,
                get_screen_size_x: stub_screen_size_x,
                create_automap_data: stub_create,
                get_mode: RetcheckFn::new(0),
                precision_to_automap: RetcheckFn::new(0),
                shift: &*self.shift,
            })
        }
    }

    #[test]
    fn test_returns_off_map_without_panel() {
        let _retcheck = retcheck_testing::lock_uninstalled();
        let mut fixture = Fixture::new();
        *fixture.panel_global = std::ptr::null_mut();
        assert_eq!(fixture.automap().world_to_automap(10, 20), OFF_MAP);
        assert!(CREATE_ARGS.with_borrow(Option::is_none));
    }

    #[test]
    fn test_returns_off_map_when_hidden() {
        let _retcheck = retcheck_testing::lock_uninstalled();
        let mut fixture = Fixture::new();
        fixture.automap.widget.visible = 0;
        assert_eq!(fixture.automap().world_to_automap(10, 20), OFF_MAP);
        assert!(CREATE_ARGS.with_borrow(Option::is_none));
    }

    #[test]
    fn test_centered_projection_inputs() {
        // With no bypass installed the guarded panel calls return their
        // defaults: mode 0 and an untouched precision value, so the input
        // coordinates come straight back.
        let _retcheck = retcheck_testing::lock_uninstalled();
        let fixture = Fixture::new();
        let result = fixture.automap().world_to_automap(1234, -7);
        assert_eq!(result, (1234.0, -7.0));

        let (rect, center, scale) = CREATE_ARGS.with_borrow(|args| args.unwrap());
        assert_eq!(
            rect,
            RectI {
                left: 100,
                top: 200,
                right: 400,
                bottom: 300
            }
        );
        // center (300, 350) packed low/high
        assert_eq!(center, (350u64 << 32) | 300);
        assert!((scale - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_centered_shift_moves_center() {
        let _retcheck = retcheck_testing::lock_uninstalled();
        let mut fixture = Fixture::new();
        *fixture.shift = 1;
        fixture.automap().world_to_automap(0, 0);
        let (_, center, _) = CREATE_ARGS.with_borrow(|args| args.unwrap());
        // 300 - 800 / 4
        assert_eq!(center as u32, 100);

        *fixture.shift = 2;
        fixture.automap().world_to_automap(0, 0);
        let (_, center, _) = CREATE_ARGS.with_borrow(|args| args.unwrap());
        assert_eq!(center as u32, 500);
    }

    #[test]
    fn test_pack_pair_round_trip() {
        let packed = pack_pair(Vec2i { x: -3, y: 9 });
        assert_eq!(packed as i32, -3);
        assert_eq!((packed >> 32) as i32, 9);
    }
}
