use core::{fmt, ptr::write_volatile};

use lazy_static::lazy_static;
use spin::Mutex;

/// VGA text-mode color palette. Not all variants are used but the full
/// 16-color palette is defined per the VGA specification.
#[allow(dead_code)] // Full VGA color palette per specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
struct ColorCode(u8);

impl ColorCode {
    fn new(foreground: Color, background: Color) -> ColorCode {
        ColorCode(((background as u8) << 4) | (foreground as u8))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
struct ScreenChar {
    ascii_character: u8,
    color_code: ColorCode,
}

const BUFFER_HEIGHT: usize = 25;
const BUFFER_WIDTH: usize = 80;

#[repr(transparent)]
struct Buffer {
    chars: [[ScreenChar; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

pub struct Writer {
    column_position: usize,
    color_code: ColorCode,
    buffer: &'static mut Buffer,
}

impl Writer {
    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            byte => {
                if self.column_position >= BUFFER_WIDTH {
                    self.new_line();
                }

                let row = BUFFER_HEIGHT - 1;
                let col = self.column_position;

                let color_code = self.color_code;
                // SAFETY: The VGA buffer at 0xb8000 is memory-mapped I/O. write_volatile
                // ensures the write is not optimized away. Row/col are bounds-checked by
                // the new_line logic above ensuring we stay within the buffer.
                unsafe {
                    write_volatile(
                        &mut self.buffer.chars[row][col],
                        ScreenChar {
                            ascii_character: byte,
                            color_code,
                        },
                    );
                }
                self.column_position += 1;
            }
        }
    }

    fn new_line(&mut self) {
        for row in 1..BUFFER_HEIGHT {
            for col in 0..BUFFER_WIDTH {
                // SAFETY: read_volatile and write_volatile access the VGA text buffer
                // at 0xb8000. Row indices are bounded by BUFFER_HEIGHT (loop range 1..25),
                // and col by BUFFER_WIDTH (0..80). row-1 is always >= 0 since row starts at 1.
                let character = unsafe { core::ptr::read_volatile(&self.buffer.chars[row][col]) };
                unsafe {
                    write_volatile(&mut self.buffer.chars[row - 1][col], character);
                }
            }
        }
        self.clear_row(BUFFER_HEIGHT - 1);
        self.column_position = 0;
    }

    fn clear_row(&mut self, row: usize) {
        let blank = ScreenChar {
            ascii_character: b' ',
            color_code: self.color_code,
        };
        for col in 0..BUFFER_WIDTH {
            // SAFETY: write_volatile to VGA text buffer. Row is passed from
            // new_line (always BUFFER_HEIGHT-1) or caller. Col bounded by BUFFER_WIDTH.
            unsafe {
                write_volatile(&mut self.buffer.chars[row][col], blank);
            }
        }
    }

    pub fn write_string(&mut self, s: &str) {
        for byte in s.bytes() {
            match byte {
                0x20..=0x7e | b'\n' => self.write_byte(byte),
                _ => self.write_byte(0xfe),
            }
        }
    }
}

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_string(s);
        Ok(())
    }
}

lazy_static! {
    pub static ref WRITER: Mutex<Writer> = Mutex::new(Writer {
        column_position: 0,
        color_code: ColorCode::new(Color::White, Color::Black),
        // SAFETY: 0xb8000 is the well-known physical address of the VGA text
        // buffer, identity-mapped in kernel space. The cast to &'static mut
        // Buffer is valid because the VGA buffer has static lifetime and is
        // protected by the enclosing Mutex<Writer>.
        buffer: unsafe { &mut *(0xb8000 as *mut Buffer) },
    });
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    use x86_64::instructions::interrupts;

    interrupts::without_interrupts(|| {
        WRITER.lock().write_fmt(args).expect("VGA write_fmt failed");
    });
}

/// Raw byte write, bypassing UTF-8 decoding -- for the `write` syscall's
/// fd 1/fd 2, whose buffers are arbitrary program output, not necessarily
/// valid UTF-8.
pub fn write_bytes(bytes: &[u8]) {
    use x86_64::instructions::interrupts;

    interrupts::without_interrupts(|| {
        let mut writer = WRITER.lock();
        for &b in bytes {
            writer.write_byte(b);
        }
    });
}
