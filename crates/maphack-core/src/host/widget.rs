//! Read-only views of the host's UI widget tree.

use core::ffi::c_void;

use super::ptr::{is_readable, try_deref};

/// Host small-string: heap or embedded storage, bit 63 of the capacity word
/// flags embedded mode.
#[repr(C)]
pub struct HostString {
    pub elements: *mut u8,
    pub size: u64,
    pub capacity: u64,
    pub storage: [u8; 16],
}

const MAX_NAME_LEN: u64 = 256;

impl HostString {
    /// Case-insensitive comparison against an ASCII name, `false` on any
    /// unreadable or implausible state.
    pub fn equals_ignore_case(&self, name: &str) -> bool {
        if self.size != name.len() as u64 || self.size > MAX_NAME_LEN {
            return false;
        }
        let len = self.size as usize;
        if !is_readable(self.elements, len) {
            return false;
        }
        let bytes = unsafe { std::slice::from_raw_parts(self.elements, len) };
        bytes.eq_ignore_ascii_case(name.as_bytes())
    }
}

/// Host vector header; elements live behind `elements`.
#[repr(C)]
pub struct HostVector<T> {
    pub elements: *mut T,
    pub size: u64,
    pub capacity: u64,
}

impl<T: Copy> HostVector<T> {
    /// Element at `idx`, guarded; `None` past the end or when unreadable.
    pub fn get(&self, idx: usize) -> Option<T> {
        if idx as u64 >= self.size {
            return None;
        }
        let at = unsafe { self.elements.add(idx) };
        super::ptr::try_read(at)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Vec2i {
    pub x: i32,
    pub y: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct RectI {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl RectI {
    pub fn from_parts(position: Vec2i, size: Vec2i) -> Self {
        Self {
            left: position.x,
            top: position.y,
            right: size.x,
            bottom: size.y,
        }
    }

    /// Center point under the host convention: `right`/`bottom` hold the
    /// extent, not the far edge.
    pub fn center(&self) -> Vec2i {
        Vec2i {
            x: self.left + self.right / 2,
            y: self.top + self.bottom / 2,
        }
    }
}

const MAX_TREE_DEPTH: usize = 32;
const MAX_PARENT_CHAIN: usize = 64;

#[repr(C)]
pub struct Widget {
    _vtable: *const c_void,
    pub name: HostString,
    pub parent: *mut Widget,
    _pad38: [u8; 16],
    pub relative_x: f32,
    pub relative_y: f32,
    pub enabled: u8,
    pub visible: u8,
    pub relative: u8,
    _unk53: u8,
    _unk54: f32,
    pub children: HostVector<*mut Widget>,
    pub absolute: RectI,
    pub scale: f32,
    _unk84: f32,
}

impl Widget {
    pub fn is_shown(&self) -> bool {
        self.enabled != 0 && self.visible != 0
    }

    /// Depth-first search of this widget and its children for a name match.
    pub fn find(&self, name: &str) -> Option<*mut Widget> {
        self.find_at_depth(name, 0)
    }

    fn find_at_depth(&self, name: &str, depth: usize) -> Option<*mut Widget> {
        if depth > MAX_TREE_DEPTH {
            return None;
        }
        if self.name.equals_ignore_case(name) {
            return Some(self as *const Widget as *mut Widget);
        }
        for idx in 0.. {
            let child = self.children.get(idx)?;
            if child.is_null() {
                return None;
            }
            let Some(widget) = (unsafe { try_deref(child.cast_const()) }) else {
                return None;
            };
            if let Some(found) = widget.find_at_depth(name, depth + 1) {
                return Some(found);
            }
        }
        None
    }

    /// Product of scales up the parent chain.
    pub fn effective_scale(&self) -> f32 {
        let mut scale = self.scale;
        let mut parent = self.parent.cast_const();
        for _ in 0..MAX_PARENT_CHAIN {
            let Some(widget) = (unsafe { try_deref(parent) }) else {
                break;
            };
            scale *= widget.scale;
            parent = widget.parent.cast_const();
        }
        scale
    }
}

/// The panel manager is itself the root widget of the tree.
#[repr(C)]
pub struct PanelManager {
    pub widget: Widget,
    _pad88: [u8; 0x30],
    pub mouse_want_capture: u8,
    pub is_hd: u8,
    _padba: [u8; 2],
    pub screen_width: u32,
    pub screen_height: u32,
    _padc4: [u8; 4],
    _global_data: u64,
    _focus_manager: *mut c_void,
    _padd8: [u8; 16],
}

const _: () = {
    use std::mem::{offset_of, size_of};

    assert!(size_of::<HostString>() == 0x28);
    assert!(size_of::<HostVector<*mut Widget>>() == 0x18);
    assert!(size_of::<Widget>() == 0x88);
    assert!(offset_of!(Widget, parent) == 0x30);
    assert!(offset_of!(Widget, visible) == 0x51);
    assert!(offset_of!(Widget, children) == 0x58);
    assert!(offset_of!(Widget, absolute) == 0x70);
    assert!(offset_of!(Widget, scale) == 0x80);
    assert!(size_of::<PanelManager>() == 0xE8);
    assert!(offset_of!(PanelManager, screen_width) == 0xBC);
};

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::pin::Pin;

    /// A fabricated widget plus the buffers its raw pointers target.
    pub struct TestWidget {
        pub widget: Pin<Box<Widget>>,
        _name: Pin<Box<[u8]>>,
        _children: Pin<Box<[*mut Widget]>>,
    }

    pub fn widget(name: &str, children: &[*mut Widget]) -> TestWidget {
        let name_buf: Pin<Box<[u8]>> = Pin::new(name.as_bytes().to_vec().into_boxed_slice());
        let child_buf: Pin<Box<[*mut Widget]>> =
            Pin::new(children.to_vec().into_boxed_slice());
        let widget = Box::pin(Widget {
            _vtable: std::ptr::null(),
            name: HostString {
                elements: name_buf.as_ptr().cast_mut(),
                size: name.len() as u64,
                capacity: name.len() as u64,
                storage: [0; 16],
            },
            parent: std::ptr::null_mut(),
            _pad38: [0; 16],
            relative_x: 0.0,
            relative_y: 0.0,
            enabled: 1,
            visible: 1,
            relative: 0,
            _unk53: 0,
            _unk54: 0.0,
            children: HostVector {
                elements: child_buf.as_ptr().cast_mut(),
                size: child_buf.len() as u64,
                capacity: child_buf.len() as u64,
            },
            absolute: RectI::default(),
            scale: 1.0,
            _unk84: 0.0,
        });
        TestWidget {
            widget,
            _name: name_buf,
            _children: child_buf,
        }
    }

    impl TestWidget {
        pub fn as_mut_ptr(&mut self) -> *mut Widget {
            let w: &mut Widget = unsafe { self.widget.as_mut().get_unchecked_mut() };
            w as *mut Widget
        }
    }
}
