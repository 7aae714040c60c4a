use scarab_protocol::CommandLine;

use crate::Firmware;

impl Firmware {
    /// Pulls bytes from the serial link, then from the media if a print is
    /// running, until the command queue is full or both sources run dry.
    pub(crate) fn read_input(&mut self) {
        if !self.queue.wants_input() {
            return;
        }

        while !self.queue.is_full() {
            let Some(byte) = self.hal.serial.read_byte() else {
                break;
            };
            match self.framer.push_serial(byte) {
                Some(Ok(line)) => self.enqueue(line),
                Some(Err(rejection)) => {
                    rejection.report(self.hal.sink.as_mut());
                    // The host resends everything from the requested line on.
                    if rejection.needs_resend() {
                        self.hal.serial.flush();
                        break;
                    }
                }
                None => {}
            }
        }

        // Media lines must not interleave with a half-received serial line.
        if !self.hal.media.is_printing() || !self.framer.serial_idle() {
            return;
        }
        while !self.queue.is_full() {
            if self.hal.media.end_of_media() {
                if let Some(line) = self.framer.finish_media() {
                    self.enqueue(line);
                }
                self.finish_print();
                break;
            }
            let Some(byte) = self.hal.media.read_byte() else {
                break;
            };
            if let Some(line) = self.framer.push_media(byte) {
                self.enqueue(line);
            }
        }
    }

    fn enqueue(&mut self, line: CommandLine) {
        if let Err(line) = self.queue.push(line) {
            // Only reachable if a source hands out more than one line per byte.
            log::error!("command queue full, dropping {:?}", line.as_str());
        }
    }

    fn finish_print(&mut self) {
        let elapsed = self.now().saturating_sub(self.print_start_ms) / 1000;
        let hours = elapsed / 3600;
        let minutes = (elapsed / 60) % 60;
        log::info!("media print finished after {elapsed}s");

        raw!(self, "Done printing file");
        echo!(self, "{hours} hours {minutes} minutes");
        let mut status = heapless::String::<32>::new();
        let _ = core::fmt::write(&mut status, format_args!("{hours} hours {minutes} minutes"));
        self.hal.display.set_status(&status);
        self.hal.media.finished();
    }
}
