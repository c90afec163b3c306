use std::collections::VecDeque;

/// Buffer FIFO acotado: conserva las últimas `capacity` muestras.
/// Lo usan el historial del extractor (ventana de segundos) y la
/// ventana del clasificador (N muestras).
#[derive(Debug, Clone)]
pub struct MotionBuffer<T> {
    buffer: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> MotionBuffer<T> {
    /// Crea un buffer vacío; la capacidad mínima es 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Añade una muestra y descarta la más antigua si no cabe
    pub fn push(&mut self, item: T) {
        self.buffer.push_back(item);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
    }

    /// Verifica si el buffer está lleno
    pub fn is_ready(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    /// Ventana contigua (más antigua → más reciente) sin copiar
    pub fn window(&mut self) -> &[T] {
        self.buffer.make_contiguous()
    }

    /// Copia del contenido (más antigua → más reciente)
    pub fn snapshot(&self) -> Vec<T> {
        self.buffer.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&T> {
        self.buffer.back()
    }

    /// Cambia la capacidad conservando solo las entradas más recientes que caben
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.buffer.len() > self.capacity {
            self.buffer.pop_front();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Limpia el buffer (la capacidad se mantiene)
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
