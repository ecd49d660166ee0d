//! X11 presentation window.
//!
//! Opens a plain Xlib window titled "Framebuffer Emulator" and pushes each
//! frame with `XPutImage`.  Framebuffer pixels are RGBA8888 (red in the low
//! byte) while a 24-bit TrueColor X visual expects red in bits 16..24, so red
//! and blue are swapped on the way out.
//!
//! Escape, `q` and the window manager's close button request termination.

use std::os::raw::{c_char, c_int, c_uint};
use std::ptr;

use fbemu_core::screen::copy_visible;
use fbemu_core::ScreenGeometry;
use x11::{keysym, xlib};

use super::{RenderError, RenderTarget, WINDOW_TITLE};
use crate::infrastructure::signal;

pub struct X11Target {
    display: *mut xlib::Display,
    screen: c_int,
    window: xlib::Window,
    gc: xlib::GC,
    wm_delete: xlib::Atom,
    width: u32,
    height: u32,
    frame: Vec<u32>,
}

fn swap_red_blue(pixel: u32) -> u32 {
    ((pixel & 0xFF) << 16) | (pixel & 0xFF00) | ((pixel >> 16) & 0xFF)
}

impl X11Target {
    /// Connects to `$DISPLAY` and maps a `width × height` window.
    ///
    /// # Errors
    ///
    /// [`RenderError::Display`] if the X server cannot be reached.
    pub fn open(width: u32, height: u32) -> Result<Self, RenderError> {
        // SAFETY: a null name selects $DISPLAY; the result is checked below.
        let display = unsafe { xlib::XOpenDisplay(ptr::null()) };
        if display.is_null() {
            let name = std::env::var("DISPLAY").unwrap_or_else(|_| "<unset>".to_string());
            return Err(RenderError::Display(format!("XOpenDisplay failed; DISPLAY={name}")));
        }

        // SAFETY: `display` is a valid connection for every call below and the
        // strings passed are NUL-terminated literals.
        let (screen, window, gc, wm_delete) = unsafe {
            let screen = xlib::XDefaultScreen(display);
            let root = xlib::XRootWindow(display, screen);
            let black = xlib::XBlackPixel(display, screen);
            let window = xlib::XCreateSimpleWindow(
                display,
                root,
                0,
                0,
                width.max(1),
                height.max(1),
                0,
                black,
                black,
            );
            let title = format!("{WINDOW_TITLE}\0");
            xlib::XStoreName(display, window, title.as_ptr() as *const c_char);
            xlib::XSelectInput(
                display,
                window,
                xlib::KeyPressMask | xlib::StructureNotifyMask | xlib::ExposureMask,
            );
            let mut wm_delete =
                xlib::XInternAtom(display, b"WM_DELETE_WINDOW\0".as_ptr() as *const c_char, xlib::False);
            xlib::XSetWMProtocols(display, window, &mut wm_delete, 1);
            xlib::XMapWindow(display, window);
            let gc = xlib::XDefaultGC(display, screen);
            xlib::XFlush(display);
            (screen, window, gc, wm_delete)
        };

        tracing::info!(width, height, "X11 window opened");
        Ok(Self {
            display,
            screen,
            window,
            gc,
            wm_delete,
            width,
            height,
            frame: vec![0; width as usize * height as usize],
        })
    }
}

impl RenderTarget for X11Target {
    fn present(&mut self, pixels: &[u32], geometry: &ScreenGeometry) -> Result<(), RenderError> {
        if geometry.xres() != self.width || geometry.yres() != self.height {
            self.resize(geometry.xres(), geometry.yres())?;
        }
        copy_visible(pixels, geometry, &mut self.frame);
        for pixel in &mut self.frame {
            *pixel = swap_red_blue(*pixel);
        }

        // SAFETY: the image borrows `self.frame`, which outlives it; the data
        // pointer is detached before XDestroyImage so Xlib does not free it.
        unsafe {
            let visual = xlib::XDefaultVisual(self.display, self.screen);
            let depth = xlib::XDefaultDepth(self.display, self.screen) as c_uint;
            let image = xlib::XCreateImage(
                self.display,
                visual,
                depth,
                xlib::ZPixmap,
                0,
                self.frame.as_mut_ptr() as *mut c_char,
                self.width,
                self.height,
                32,
                0,
            );
            if image.is_null() {
                return Err(RenderError::Display("XCreateImage failed".to_string()));
            }
            xlib::XPutImage(
                self.display,
                self.window,
                self.gc,
                image,
                0,
                0,
                0,
                0,
                self.width,
                self.height,
            );
            (*image).data = ptr::null_mut();
            xlib::XDestroyImage(image);
            xlib::XFlush(self.display);
        }
        Ok(())
    }

    fn poll_termination_requested(&mut self) -> bool {
        let mut requested = signal::take_termination_request();
        // SAFETY: events are read into a zeroed union owned by this frame.
        unsafe {
            while xlib::XPending(self.display) > 0 {
                let mut event: xlib::XEvent = std::mem::zeroed();
                xlib::XNextEvent(self.display, &mut event);
                match event.get_type() {
                    xlib::KeyPress => {
                        let sym = xlib::XLookupKeysym(&mut event.key, 0);
                        if sym == xlib::KeySym::from(keysym::XK_Escape)
                            || sym == xlib::KeySym::from(keysym::XK_q)
                        {
                            requested = true;
                        }
                    }
                    xlib::ClientMessage => {
                        if event.client_message.data.get_long(0) as xlib::Atom == self.wm_delete {
                            requested = true;
                        }
                    }
                    _ => {}
                }
            }
        }
        requested
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if width == self.width && height == self.height {
            return Ok(());
        }
        tracing::info!(width, height, "window resized");
        // SAFETY: valid display and window.
        unsafe {
            xlib::XResizeWindow(self.display, self.window, width.max(1), height.max(1));
            xlib::XFlush(self.display);
        }
        self.width = width;
        self.height = height;
        self.frame = vec![0; width as usize * height as usize];
        Ok(())
    }
}

impl Drop for X11Target {
    fn drop(&mut self) {
        // SAFETY: window and display were created in `open` and are released once.
        unsafe {
            xlib::XDestroyWindow(self.display, self.window);
            xlib::XCloseDisplay(self.display);
        }
    }
}
